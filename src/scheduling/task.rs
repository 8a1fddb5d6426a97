//! # Scheduled unit of work.
//!
//! Dispatcher drain loops, pollers and source adapters all run as [`Task`]s on the
//! [`TaskScheduler`](crate::scheduling::TaskScheduler).

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Shared handle to a task.
pub type TaskRef = Arc<dyn Task>;

/// # Asynchronous, cancellable unit.
///
/// One call to [`run`](Task::run) is one attempt. Implementations should watch `ctx` and
/// return promptly (`Ok(())` or [`TaskError::Canceled`]) once it is cancelled.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use async_trait::async_trait;
/// use msgbus::{Task, TaskError};
///
/// struct Heartbeat;
///
/// #[async_trait]
/// impl Task for Heartbeat {
///     fn name(&self) -> &str { "heartbeat" }
///
///     async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
///         if ctx.is_cancelled() {
///             return Err(TaskError::Canceled);
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Stable, human-readable name.
    fn name(&self) -> &str;

    /// Runs one attempt.
    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError>;
}
