//! # Targets: the receiving side of a channel.
//!
//! A [`Target`] accepts one message at a time. Endpoints are targets, and so is anything
//! wrapped in [`TargetFn`].
//!
//! ## Example
//! ```rust
//! use msgbus::{Message, MessagingError, TargetFn, TargetRef};
//!
//! let sink: TargetRef = TargetFn::arc(|msg: Message| async move {
//!     let _ = msg.payload();
//!     Ok::<_, MessagingError>(())
//! });
//! # let _ = sink;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MessagingError;
use crate::messages::Message;

/// Receives messages from a channel or dispatcher.
#[async_trait]
pub trait Target: Send + Sync + 'static {
    /// Accepts a message. An `Err` lets point-to-point dispatch fail over to the next target.
    async fn send(&self, message: Message) -> Result<(), MessagingError>;
}

/// Shared handle to a target.
pub type TargetRef = Arc<dyn Target>;

/// Closure-backed [`Target`].
pub struct TargetFn<F> {
    f: F,
}

impl<F> TargetFn<F> {
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps a closure and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Target for TargetFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MessagingError>> + Send + 'static,
{
    async fn send(&self, message: Message) -> Result<(), MessagingError> {
        (self.f)(message).await
    }
}

/// Identity comparison on the pointed-to object (vtables ignored).
pub(crate) fn same_target(a: &TargetRef, b: &TargetRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
