//! # Task scheduling.
//!
//! - [`Task`] / [`TaskFn`]: cancellable units of work.
//! - [`TaskSpec`] + [`Trigger`]: when to run them; [`BackoffPolicy`]: how to retry failures.
//! - [`TaskScheduler`]: runs specs as actors with graceful stop.
//! - [`ErrorHandler`]: what happens to failures
//!   ([`PublishingErrorHandler`], [`PropagatingErrorHandler`]).

mod actor;
mod backoff;
mod error_handler;
mod scheduler;
mod spec;
mod task;
mod task_fn;

pub use backoff::BackoffPolicy;
pub use error_handler::{ErrorHandler, PropagatingErrorHandler, PublishingErrorHandler};
pub use scheduler::{TaskHandle, TaskScheduler};
pub use spec::{TaskSpec, Trigger};
pub use task::{Task, TaskRef};
pub use task_fn::TaskFn;
