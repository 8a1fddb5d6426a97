//! # Channel registry: name → channel.
//!
//! The registry is shared between the bus (registration) and endpoints (reply and output
//! channel resolution during delivery), so lookups may race with registration. Both go
//! through one `RwLock`; lookups only take the read side.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ConfigurationError;

use super::channel::ChannelRef;

/// Resolves channels by name.
#[async_trait]
pub trait ChannelRegistry: Send + Sync + 'static {
    /// Returns the channel registered under `name`.
    async fn lookup_channel(&self, name: &str) -> Option<ChannelRef>;

    /// Registers `channel` under `name`, replacing any previous entry.
    async fn register_channel(
        &self,
        name: &str,
        channel: ChannelRef,
    ) -> Result<(), ConfigurationError>;

    /// Removes and returns the channel registered under `name`.
    async fn unregister_channel(&self, name: &str) -> Option<ChannelRef>;
}

/// Concurrent in-memory [`ChannelRegistry`].
#[derive(Default)]
pub struct DefaultChannelRegistry {
    channels: RwLock<HashMap<String, ChannelRef>>,
}

impl DefaultChannelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a channel, naming it; returns the entry it replaced.
    pub async fn insert(
        &self,
        name: &str,
        channel: ChannelRef,
    ) -> Result<Option<ChannelRef>, ConfigurationError> {
        channel.assign_name(name)?;
        Ok(self
            .channels
            .write()
            .await
            .insert(name.to_string(), channel))
    }

    /// Sorted names of all registered channels.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// All registered channels.
    pub async fn channels(&self) -> Vec<ChannelRef> {
        self.channels.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ChannelRegistry for DefaultChannelRegistry {
    async fn lookup_channel(&self, name: &str) -> Option<ChannelRef> {
        self.channels.read().await.get(name).cloned()
    }

    async fn register_channel(
        &self,
        name: &str,
        channel: ChannelRef,
    ) -> Result<(), ConfigurationError> {
        self.insert(name, channel).await.map(|_| ())
    }

    async fn unregister_channel(&self, name: &str) -> Option<ChannelRef> {
        self.channels.write().await.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::channels::MessageChannel;

    #[tokio::test]
    async fn register_lookup_unregister() {
        let registry = DefaultChannelRegistry::new();
        let ch: ChannelRef = Arc::new(MessageChannel::queue(8));

        registry.register_channel("orders", ch.clone()).await.unwrap();
        assert_eq!(ch.name(), "orders");
        assert_eq!(
            registry.lookup_channel("orders").await.map(|c| c.id()),
            Some(ch.id())
        );
        assert_eq!(registry.names().await, vec!["orders".to_string()]);

        let removed = registry.unregister_channel("orders").await;
        assert_eq!(removed.map(|c| c.id()), Some(ch.id()));
        assert!(registry.lookup_channel("orders").await.is_none());
    }

    #[tokio::test]
    async fn same_channel_under_second_name_is_rejected() {
        let registry = DefaultChannelRegistry::new();
        let ch: ChannelRef = Arc::new(MessageChannel::direct());

        registry.register_channel("a", ch.clone()).await.unwrap();
        let err = registry.register_channel("b", ch).await.unwrap_err();
        assert_eq!(err.as_label(), "config_renamed");
        assert!(registry.lookup_channel("b").await.is_none());
    }
}
