//! # Builder for a wired [`MessageBus`].
//!
//! Collects channels, endpoints and source adapters, then registers them in that order.
//!
//! ```no_run
//! use std::sync::Arc;
//! use msgbus::{BusConfig, MessageBus, MessageChannel, MessageEndpoint, Subscription, TargetFn, Message, MessagingError};
//!
//! # async fn demo() -> Result<(), msgbus::RuntimeError> {
//! let sink = TargetFn::arc(|msg: Message| async move {
//!     println!("{}", msg.payload());
//!     Ok::<_, MessagingError>(())
//! });
//! let bus = MessageBus::builder(BusConfig::default())
//!     .with_channel("in", Arc::new(MessageChannel::queue(16)))
//!     .with_endpoint("printer", MessageEndpoint::target(sink).with_subscription(Subscription::to_name("in")))
//!     .launch()
//!     .await?;
//! assert!(bus.is_running());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::adapters::SourceAdapter;
use crate::channels::ChannelRef;
use crate::endpoints::MessageEndpoint;
use crate::error::RuntimeError;
use crate::subscribers::Subscribe;

use super::config::BusConfig;
use super::message_bus::MessageBus;

/// Builder returned by [`MessageBus::builder`].
pub struct MessageBusBuilder {
    cfg: BusConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    channels: Vec<(String, ChannelRef)>,
    endpoints: Vec<(String, Arc<MessageEndpoint>)>,
    adapters: Vec<(String, Arc<dyn SourceAdapter>)>,
}

impl MessageBusBuilder {
    pub(crate) fn new(cfg: BusConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            channels: Vec::new(),
            endpoints: Vec::new(),
            adapters: Vec::new(),
        }
    }

    /// Event subscribers (logging, metrics, ...).
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers.extend(subscribers);
        self
    }

    /// A channel to register under `name`.
    pub fn with_channel(mut self, name: impl Into<String>, channel: ChannelRef) -> Self {
        self.channels.push((name.into(), channel));
        self
    }

    /// An endpoint to register under `name`.
    pub fn with_endpoint(mut self, name: impl Into<String>, endpoint: MessageEndpoint) -> Self {
        self.endpoints.push((name.into(), Arc::new(endpoint)));
        self
    }

    /// A source adapter to register under `name`.
    pub fn with_source_adapter(
        mut self,
        name: impl Into<String>,
        adapter: Arc<dyn SourceAdapter>,
    ) -> Self {
        self.adapters.push((name.into(), adapter));
        self
    }

    /// Creates the bus without registering the collected components.
    ///
    /// With subscribers, this must be called within a tokio runtime.
    pub fn build(self) -> MessageBus {
        MessageBus::with_subscribers(self.cfg, self.subscribers)
    }

    /// Creates the bus, registers channels, endpoints and source adapters, and starts it
    /// when `auto_startup` is set.
    pub async fn launch(self) -> Result<MessageBus, RuntimeError> {
        let Self {
            cfg,
            subscribers,
            channels,
            endpoints,
            adapters,
        } = self;
        let auto_startup = cfg.auto_startup;
        let bus = MessageBus::with_subscribers(cfg, subscribers);

        for (name, channel) in channels {
            bus.register_channel(&name, channel).await?;
        }
        for (name, endpoint) in endpoints {
            bus.register_endpoint(&name, endpoint).await?;
        }
        for (name, adapter) in adapters {
            bus.register_source_adapter(&name, adapter).await;
        }
        if auto_startup {
            bus.start().await?;
        }
        Ok(bus)
    }
}
