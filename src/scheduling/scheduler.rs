//! # TaskScheduler: runs [`TaskSpec`]s as actors under one cancellation root.
//!
//! ```text
//! schedule(spec) ──► entries ──(start)──► JoinSet ◄── actor per entry
//!                                            │
//!                           stop(): cancel root, wait ≤ grace, abort the rest
//! ```
//!
//! ## Rules
//! - Specs scheduled before `start()` run when the scheduler starts.
//! - An entry stays registered until its task finishes for good or its
//!   [`TaskHandle`] is cancelled, so interrupted tasks run again after a restart.
//! - `stop()` publishes `AllStoppedWithin`, or `GraceExceeded` plus
//!   [`RuntimeError::GraceExceeded`] listing the tasks still running.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::events::{Event, EventBus, EventKind};

use super::actor::{Exit, TaskActor};
use super::backoff::BackoffPolicy;
use super::error_handler::ErrorHandler;
use super::spec::TaskSpec;

/// Handle to one scheduled task.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: u64,
    name: Arc<str>,
    token: CancellationToken,
}

impl TaskHandle {
    /// Stops the task (now, or before it ever runs) and removes it from the scheduler.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scheduler-assigned id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Entry {
    spec: TaskSpec,
    token: CancellationToken,
}

#[derive(Default)]
struct Registry {
    entries: BTreeMap<u64, Entry>,
    live: BTreeMap<u64, Arc<str>>,
}

#[derive(Default)]
struct Running {
    root: Option<CancellationToken>,
    set: JoinSet<()>,
}

/// Scheduler for the bus's background work.
pub struct TaskScheduler {
    events: EventBus,
    grace: Duration,
    backoff: BackoffPolicy,
    timeout: Option<Duration>,
    errors: Arc<RwLock<Option<Arc<dyn ErrorHandler>>>>,
    registry: Arc<Mutex<Registry>>,
    running: Mutex<Running>,
    started: AtomicBool,
    next_id: AtomicU64,
}

impl TaskScheduler {
    /// Creates a stopped scheduler publishing to `events`.
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            grace: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            timeout: None,
            errors: Arc::new(RwLock::new(None)),
            registry: Arc::new(Mutex::new(Registry::default())),
            running: Mutex::new(Running::default()),
            started: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// How long `stop()` waits for tasks to exit.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Backoff for specs without their own.
    pub fn with_default_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Per-attempt timeout for specs without their own (`None` or zero: no timeout).
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|d| !d.is_zero());
        self
    }

    /// Installs the handler for failed attempts.
    pub async fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        *self.errors.write().await = Some(handler);
    }

    /// Current handler for failed attempts.
    pub async fn error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
        self.errors.read().await.clone()
    }

    /// True between `start()` and `stop()`.
    pub fn is_running(&self) -> bool {
        self.started.load(AtomicOrdering::Acquire)
    }

    /// Registers `spec`; it runs now if the scheduler is running, otherwise on `start()`.
    pub async fn schedule(&self, spec: TaskSpec) -> TaskHandle {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let token = CancellationToken::new();
        let handle = TaskHandle {
            id,
            name: Arc::from(spec.name()),
            token: token.clone(),
        };

        let mut running = self.running.lock().await;
        let mut registry = self.registry.lock().await;
        if let Some(root) = running.root.clone() {
            self.spawn(&mut running.set, &mut registry, &root, id, &spec, &token);
        }
        registry.entries.insert(id, Entry { spec, token });
        handle
    }

    /// Starts every registered task. No-op if already running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.root.is_some() {
            return;
        }
        let root = CancellationToken::new();
        let mut registry = self.registry.lock().await;
        registry.entries.retain(|_, e| !e.token.is_cancelled());

        let pending: Vec<(u64, TaskSpec, CancellationToken)> = registry
            .entries
            .iter()
            .map(|(id, e)| (*id, e.spec.clone(), e.token.clone()))
            .collect();
        for (id, spec, token) in pending {
            self.spawn(&mut running.set, &mut registry, &root, id, &spec, &token);
        }

        running.root = Some(root);
        self.started.store(true, AtomicOrdering::Release);
    }

    /// Cancels every task and waits up to the grace period; stragglers are aborted.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        let (root, mut set) = {
            let mut running = self.running.lock().await;
            let Some(root) = running.root.take() else {
                return Ok(());
            };
            (root, std::mem::take(&mut running.set))
        };
        self.started.store(false, AtomicOrdering::Release);
        root.cancel();

        let drained = tokio::time::timeout(self.grace, async {
            while set.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => {
                self.events.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                set.abort_all();
                let stuck: Vec<String> = {
                    let mut registry = self.registry.lock().await;
                    let names = registry.live.values().map(|n| n.to_string()).collect();
                    registry.live.clear();
                    names
                };
                self.events.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")),
                );
                Err(RuntimeError::GraceExceeded {
                    grace: self.grace,
                    stuck,
                })
            }
        }
    }

    fn spawn(
        &self,
        set: &mut JoinSet<()>,
        registry: &mut Registry,
        root: &CancellationToken,
        id: u64,
        spec: &TaskSpec,
        handle: &CancellationToken,
    ) {
        if handle.is_cancelled() {
            return;
        }
        registry.live.insert(id, Arc::from(spec.name()));

        let actor = TaskActor {
            task: Arc::clone(spec.task()),
            trigger: spec.trigger(),
            backoff: spec.backoff().unwrap_or(self.backoff),
            timeout: spec.timeout().or(self.timeout),
            events: self.events.clone(),
            errors: Arc::clone(&self.errors),
        };
        let token = root.child_token();
        let handle = handle.clone();
        let registry = Arc::clone(&self.registry);

        set.spawn(async move {
            let relay = {
                let token = token.clone();
                let handle = handle.clone();
                async move {
                    handle.cancelled().await;
                    token.cancel();
                    std::future::pending::<()>().await
                }
            };
            let exit = tokio::select! {
                exit = actor.run(token) => exit,
                _ = relay => Exit::Interrupted,
            };

            let mut registry = registry.lock().await;
            registry.live.remove(&id);
            if exit == Exit::Finished || handle.is_cancelled() {
                registry.entries.remove(&id);
            }
        });
    }
}
