//! # Task specification: what to run and when.
//!
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use msgbus::{TaskError, TaskFn, TaskSpec, Trigger};
//!
//! let task = TaskFn::arc("poll", |_ctx: CancellationToken| async { Ok::<_, TaskError>(()) });
//! let spec = TaskSpec::fixed_delay(task, Duration::from_secs(1))
//!     .with_initial_delay(Duration::from_millis(250))
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert!(matches!(spec.trigger(), Trigger::FixedDelay { .. }));
//! ```

use std::time::Duration;

use super::backoff::BackoffPolicy;
use super::task::TaskRef;

/// When a task runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Run until one attempt succeeds, then exit.
    Once,
    /// Run repeatedly, waiting `period` after each successful attempt.
    FixedDelay {
        /// Pause between the end of one successful attempt and the start of the next.
        period: Duration,
        /// Pause before the first attempt.
        initial_delay: Duration,
    },
}

/// A task plus its trigger, failure backoff and per-attempt timeout.
///
/// Unset backoff and timeout fall back to the scheduler defaults.
#[derive(Clone)]
pub struct TaskSpec {
    task: TaskRef,
    trigger: Trigger,
    backoff: Option<BackoffPolicy>,
    timeout: Option<Duration>,
}

impl TaskSpec {
    /// Runs `task` until it succeeds once.
    pub fn once(task: TaskRef) -> Self {
        Self {
            task,
            trigger: Trigger::Once,
            backoff: None,
            timeout: None,
        }
    }

    /// Runs `task` repeatedly with `period` between attempts.
    pub fn fixed_delay(task: TaskRef, period: Duration) -> Self {
        Self {
            task,
            trigger: Trigger::FixedDelay {
                period,
                initial_delay: Duration::ZERO,
            },
            backoff: None,
            timeout: None,
        }
    }

    /// Delays the first attempt. No effect on [`Trigger::Once`].
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        if let Trigger::FixedDelay { initial_delay, .. } = &mut self.trigger {
            *initial_delay = delay;
        }
        self
    }

    /// Overrides the failure backoff.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Sets a per-attempt timeout; zero disables it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The task.
    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    /// Task name.
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// The trigger.
    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    /// Backoff override, if any.
    pub fn backoff(&self) -> Option<BackoffPolicy> {
        self.backoff
    }

    /// Timeout override, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name())
            .field("trigger", &self.trigger)
            .field("backoff", &self.backoff)
            .field("timeout", &self.timeout)
            .finish()
    }
}
