//! # Error handlers for failed message processing and failed task attempts.
//!
//! - [`PublishingErrorHandler`] turns the failure into an error message
//!   ([`Message::error`]) and offers it to an error channel.
//! - [`PropagatingErrorHandler`] hands the error back to the caller; direct channel
//!   subscribers use it so that senders see failures.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::bus::ERROR_CHANNEL_NAME;
use crate::channels::{ChannelRef, ChannelRegistry};
use crate::error::MessagingError;
use crate::messages::Message;

/// Reaction to a processing failure.
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    /// Handles `error`; `failed` is the message being processed, if any.
    ///
    /// Returning `Err` propagates the failure to whoever triggered the processing.
    async fn handle(&self, error: MessagingError, failed: Option<&Message>)
    -> Result<(), MessagingError>;
}

/// Publishes failures as error messages.
///
/// The destination is, in order: the failed message's `error_channel` header, the channel
/// registered as `errorChannel`, then the fallback channel given at construction.
/// Publishing never blocks: a full error channel drops the error message with a warning.
pub struct PublishingErrorHandler {
    channels: Arc<dyn ChannelRegistry>,
    fallback: Option<ChannelRef>,
}

impl PublishingErrorHandler {
    /// Creates a handler resolving error channels through `channels`.
    pub fn new(channels: Arc<dyn ChannelRegistry>) -> Self {
        Self {
            channels,
            fallback: None,
        }
    }

    /// Channel used when nothing resolves by name.
    pub fn with_fallback(mut self, channel: ChannelRef) -> Self {
        self.fallback = Some(channel);
        self
    }

    async fn resolve(&self, failed: Option<&Message>) -> Option<ChannelRef> {
        if let Some(name) = failed.and_then(|m| m.headers().error_channel.as_deref()) {
            match self.channels.lookup_channel(name).await {
                Some(channel) => return Some(channel),
                None => warn!(channel = name, "error channel from header not found"),
            }
        }
        match self.channels.lookup_channel(ERROR_CHANNEL_NAME).await {
            Some(channel) => Some(channel),
            None => self.fallback.clone(),
        }
    }
}

#[async_trait]
impl ErrorHandler for PublishingErrorHandler {
    async fn handle(
        &self,
        error: MessagingError,
        failed: Option<&Message>,
    ) -> Result<(), MessagingError> {
        let Some(channel) = self.resolve(failed).await else {
            warn!(error = %error, "no error channel available");
            return Err(error);
        };

        let message = Message::error(&error, failed);
        let message_id = message.id();
        match channel.try_send(message).await {
            Ok(()) => Ok(()),
            Err(MessagingError::ChannelFull { channel }) => {
                warn!(%channel, message_id, error = %error, "error channel full, dropping error message");
                Ok(())
            }
            Err(e) => {
                warn!(channel = channel.name(), error = %e, "failed to publish error message");
                Err(error)
            }
        }
    }
}

/// Returns every error to the caller unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PropagatingErrorHandler;

#[async_trait]
impl ErrorHandler for PropagatingErrorHandler {
    async fn handle(
        &self,
        error: MessagingError,
        _failed: Option<&Message>,
    ) -> Result<(), MessagingError> {
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{DefaultChannelRegistry, MessageChannel};
    use crate::messages::FAILED_MESSAGE_ATTRIBUTE;

    async fn registry_with(names: &[(&str, usize)]) -> Arc<DefaultChannelRegistry> {
        let registry = Arc::new(DefaultChannelRegistry::new());
        for (name, cap) in names {
            registry
                .insert(name, Arc::new(MessageChannel::queue(*cap)))
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn publishes_to_the_error_channel() {
        let registry = registry_with(&[(ERROR_CHANNEL_NAME, 4)]).await;
        let handler = PublishingErrorHandler::new(registry.clone());
        let failed = Message::new(1);

        handler
            .handle(MessagingError::handler("boom"), Some(&failed))
            .await
            .unwrap();

        let channel = registry.lookup_channel(ERROR_CHANNEL_NAME).await.unwrap();
        let published = channel.try_receive().await.unwrap();
        assert!(published.is_error());
        assert_eq!(published.correlation_id(), Some(failed.id()));
        assert_eq!(
            published.headers().attribute(FAILED_MESSAGE_ATTRIBUTE),
            Some(&serde_json::json!(failed.id()))
        );
    }

    #[tokio::test]
    async fn header_error_channel_wins() {
        let registry = registry_with(&[(ERROR_CHANNEL_NAME, 4), ("custom", 4)]).await;
        let handler = PublishingErrorHandler::new(registry.clone());
        let failed = Message::new(1).with_error_channel("custom");

        handler
            .handle(MessagingError::handler("boom"), Some(&failed))
            .await
            .unwrap();

        let custom = registry.lookup_channel("custom").await.unwrap();
        let default = registry.lookup_channel(ERROR_CHANNEL_NAME).await.unwrap();
        assert_eq!(custom.len(), 1);
        assert!(default.is_empty());
    }

    #[tokio::test]
    async fn full_error_channel_drops_quietly() {
        let registry = registry_with(&[(ERROR_CHANNEL_NAME, 1)]).await;
        let handler = PublishingErrorHandler::new(registry.clone());

        handler.handle(MessagingError::handler("a"), None).await.unwrap();
        handler.handle(MessagingError::handler("b"), None).await.unwrap();

        let channel = registry.lookup_channel(ERROR_CHANNEL_NAME).await.unwrap();
        assert_eq!(channel.len(), 1);
    }

    #[tokio::test]
    async fn falls_back_when_nothing_is_registered() {
        let fallback = Arc::new(MessageChannel::queue(2));
        let handler = PublishingErrorHandler::new(Arc::new(DefaultChannelRegistry::new()))
            .with_fallback(fallback.clone());

        handler.handle(MessagingError::handler("x"), None).await.unwrap();
        assert_eq!(fallback.len(), 1);
    }

    #[tokio::test]
    async fn without_any_channel_the_error_propagates() {
        let handler = PublishingErrorHandler::new(Arc::new(DefaultChannelRegistry::new()));
        let err = handler
            .handle(MessagingError::handler("x"), None)
            .await
            .unwrap_err();
        assert_eq!(err, MessagingError::handler("x"));
    }

    #[tokio::test]
    async fn propagating_returns_the_error() {
        let err = PropagatingErrorHandler
            .handle(MessagingError::handler("x"), None)
            .await
            .unwrap_err();
        assert_eq!(err, MessagingError::handler("x"));
    }
}
