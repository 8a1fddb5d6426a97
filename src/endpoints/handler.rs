//! # Message handlers: request in, optional reply out.
//!
//! A [`MessageHandler`] is the business logic behind a handler endpoint. Returning
//! `Ok(Some(reply))` routes the reply to the request's return address or to the endpoint's
//! default output channel.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MessagingError;
use crate::messages::Message;

/// Outcome of handling one message.
pub type HandlerResult = Result<Option<Message>, MessagingError>;

/// Processes a message and optionally produces a reply.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use msgbus::{HandlerResult, Message, MessageHandler};
///
/// struct Upper;
///
/// #[async_trait]
/// impl MessageHandler for Upper {
///     async fn handle(&self, message: Message) -> HandlerResult {
///         let text = message.payload().as_str().unwrap_or_default().to_uppercase();
///         Ok(Some(message.reply(text)))
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles a single message.
    async fn handle(&self, message: Message) -> HandlerResult;
}

/// Closure-backed [`MessageHandler`].
///
/// Every call produces a fresh future; share state through `Arc` captured by the closure.
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
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
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, message: Message) -> HandlerResult {
        (self.f)(message).await
    }
}
