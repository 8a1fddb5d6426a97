//! # Source adapter contracts.
//!
//! A [`SourceAdapter`] brings messages in from outside the bus. It contributes either a
//! scheduled polling task, start/stop hooks through [`Lifecycle`], or both:
//!
//! ```text
//! register_source_adapter ─┬─ task(name)   ─► TaskScheduler
//!                          └─ lifecycle()  ─► started/stopped with the bus
//! ```
//!
//! [`MessageSource`] is the pull side used by
//! [`PollingSourceAdapter`](crate::PollingSourceAdapter).

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MessagingError;
use crate::messages::Message;
use crate::scheduling::TaskSpec;

/// Something the bus starts and stops alongside itself.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// Starts; must be idempotent.
    async fn start(&self);
    /// Stops; must be idempotent.
    async fn stop(&self);
    /// True between `start` and `stop`.
    fn is_running(&self) -> bool;
}

/// External producer of messages registered on the bus.
pub trait SourceAdapter: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Scheduled work, if this adapter polls. `name` is the registration name.
    fn task(self: Arc<Self>, name: &str) -> Option<TaskSpec> {
        let _ = name;
        None
    }

    /// Start/stop hooks, if this adapter runs on its own.
    fn lifecycle(self: Arc<Self>) -> Option<Arc<dyn Lifecycle>> {
        None
    }
}

/// Pull-based message producer.
#[async_trait]
pub trait MessageSource: Send + Sync + 'static {
    /// Next available message; `Ok(None)` when nothing is pending right now.
    async fn receive(&self) -> Result<Option<Message>, MessagingError>;
}

/// [`MessageSource`] backed by a closure.
///
/// ```rust
/// use msgbus::{Message, MessagingError, SourceFn};
///
/// let source = SourceFn::arc(|| async { Ok::<_, MessagingError>(Some(Message::new("tick"))) });
/// ```
pub struct SourceFn<F> {
    f: F,
}

impl<F> SourceFn<F> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps `f` behind an `Arc`.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> MessageSource for SourceFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Message>, MessagingError>> + Send + 'static,
{
    async fn receive(&self) -> Result<Option<Message>, MessagingError> {
        (self.f)().await
    }
}
