//! # Concurrency policy for endpoints.
//!
//! Without a policy an endpoint handles each message on the delivering task. With one,
//! `send` hands the message to a spawned task and returns immediately:
//!
//! ```text
//! send(msg) ──► pending < max_concurrency + queue_capacity ?
//!                 ├─ no  → Err(Rejected)
//!                 └─ yes → spawn { acquire permit (max_concurrency) → handle(msg) }
//! ```
//!
//! Errors raised on spawned tasks cannot reach the sender; they go to the endpoint's error
//! handler (or are logged when it has none).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Limits how many messages an endpoint handles at once and how many may wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConcurrencyPolicy {
    /// Messages handled simultaneously (min 1).
    pub max_concurrency: usize,
    /// Messages allowed to wait for a free slot.
    pub queue_capacity: usize,
}

impl ConcurrencyPolicy {
    /// Creates a policy.
    pub fn new(max_concurrency: usize, queue_capacity: usize) -> Self {
        Self {
            max_concurrency,
            queue_capacity,
        }
    }

    fn permits(&self) -> usize {
        self.max_concurrency.max(1)
    }

    fn backlog_limit(&self) -> usize {
        self.permits().saturating_add(self.queue_capacity)
    }
}

impl Default for ConcurrencyPolicy {
    /// `max_concurrency = 10`, `queue_capacity = 100`.
    fn default() -> Self {
        Self::new(10, 100)
    }
}

/// Runtime state built from a [`ConcurrencyPolicy`].
pub(crate) struct Gate {
    policy: ConcurrencyPolicy,
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
}

/// Admission ticket: counts toward the backlog until dropped.
pub(crate) struct Ticket {
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
}

impl Gate {
    pub(crate) fn new(policy: ConcurrencyPolicy) -> Self {
        Self {
            policy,
            semaphore: Arc::new(Semaphore::new(policy.permits())),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    /// Reserves a backlog slot; `None` when the backlog is full.
    pub(crate) fn admit(&self) -> Option<Ticket> {
        let limit = self.policy.backlog_limit();
        self.pending
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        Some(Ticket {
            semaphore: Arc::clone(&self.semaphore),
            pending: Arc::clone(&self.pending),
        })
    }
}

impl Ticket {
    /// Waits for a processing slot.
    pub(crate) async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, AtomicOrdering::AcqRel);
    }
}
