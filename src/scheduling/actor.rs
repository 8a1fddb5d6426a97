//! # Actor loop driving one scheduled task.
//!
//! ```text
//! initial delay ─► attempt ─┬─ Ok ──────► Once: exit │ FixedDelay: sleep(period) ─► attempt
//!                           ├─ Canceled ► exit
//!                           ├─ Fatal ───► error handler ─► TaskDead ─► exit
//!                           └─ Fail/Timeout ► error handler ─► sleep(backoff) ─► attempt
//! ```
//!
//! Cancellation is observed at every wait; attempts run sequentially.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{MessagingError, TaskError};
use crate::events::{Event, EventBus, EventKind};

use super::backoff::BackoffPolicy;
use super::error_handler::ErrorHandler;
use super::spec::Trigger;
use super::task::TaskRef;

/// Why an actor returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    /// The task is done for good (`Once` succeeded, or a fatal error).
    Finished,
    /// The actor observed cancellation.
    Interrupted,
}

pub(crate) struct TaskActor {
    pub(crate) task: TaskRef,
    pub(crate) trigger: Trigger,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) timeout: Option<Duration>,
    pub(crate) events: EventBus,
    pub(crate) errors: Arc<RwLock<Option<Arc<dyn ErrorHandler>>>>,
}

impl TaskActor {
    pub(crate) async fn run(self, token: CancellationToken) -> Exit {
        if let Trigger::FixedDelay { initial_delay, .. } = self.trigger {
            if !sleep_or_cancel(initial_delay, &token).await {
                return Exit::Interrupted;
            }
        }

        let mut attempt: u32 = 0;
        let mut failures: u32 = 0;

        loop {
            if token.is_cancelled() {
                return Exit::Interrupted;
            }
            attempt = attempt.saturating_add(1);
            self.publish(EventKind::TaskStarting, attempt);

            match self.run_once(&token, attempt).await {
                Ok(()) => {
                    failures = 0;
                    match self.trigger {
                        Trigger::Once => return Exit::Finished,
                        Trigger::FixedDelay { period, .. } => {
                            if !sleep_or_cancel(period, &token).await {
                                return Exit::Interrupted;
                            }
                        }
                    }
                }
                Err(TaskError::Canceled) => return Exit::Interrupted,
                Err(e) if !e.is_retryable() => {
                    self.report(&e).await;
                    self.events.publish(
                        Event::new(EventKind::TaskDead)
                            .with_task(self.task.name())
                            .with_attempt(attempt)
                            .with_reason(e.to_string()),
                    );
                    return Exit::Finished;
                }
                Err(e) => {
                    self.report(&e).await;
                    let delay = self.backoff.next(failures);
                    failures = failures.saturating_add(1);
                    self.events.publish(
                        Event::new(EventKind::BackoffScheduled)
                            .with_task(self.task.name())
                            .with_attempt(attempt)
                            .with_delay(delay)
                            .with_reason(e.to_string()),
                    );
                    if !sleep_or_cancel(delay, &token).await {
                        return Exit::Interrupted;
                    }
                }
            }
        }
    }

    /// One attempt with the optional timeout; publishes exactly one terminal event.
    async fn run_once(&self, parent: &CancellationToken, attempt: u32) -> Result<(), TaskError> {
        let child = parent.child_token();

        let res = match self.timeout.filter(|d| !d.is_zero()) {
            Some(dur) => match time::timeout(dur, self.task.run(child.clone())).await {
                Ok(r) => r,
                Err(_elapsed) => {
                    child.cancel();
                    self.events.publish(
                        Event::new(EventKind::TimeoutHit)
                            .with_task(self.task.name())
                            .with_attempt(attempt)
                            .with_timeout(dur),
                    );
                    Err(TaskError::Timeout { timeout: dur })
                }
            },
            None => self.task.run(child).await,
        };

        match &res {
            Ok(()) | Err(TaskError::Canceled) => self.publish(EventKind::TaskStopped, attempt),
            Err(e) => self.events.publish(
                Event::new(EventKind::TaskFailed)
                    .with_task(self.task.name())
                    .with_attempt(attempt)
                    .with_reason(e.to_string()),
            ),
        }
        res
    }

    async fn report(&self, error: &TaskError) {
        let handler = self.errors.read().await.clone();
        let failure = MessagingError::TaskFailed {
            task: self.task.name().to_string(),
            reason: error.to_string(),
        };
        match handler {
            Some(handler) => {
                if let Err(e) = handler.handle(failure, None).await {
                    warn!(task = self.task.name(), error = %e, "task failure not handled");
                }
            }
            None => warn!(task = self.task.name(), error = %error, "task attempt failed"),
        }
    }

    fn publish(&self, kind: EventKind, attempt: u32) {
        self.events.publish(
            Event::new(kind)
                .with_task(self.task.name())
                .with_attempt(attempt),
        );
    }
}

/// Sleeps for `d`; false if `token` was cancelled first.
async fn sleep_or_cancel(d: Duration, token: &CancellationToken) -> bool {
    if d.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = time::sleep(d) => true,
        _ = token.cancelled() => false,
    }
}
