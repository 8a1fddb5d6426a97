//! # MessageBus: registries, dispatchers and lifecycle in one place.
//!
//! ```text
//!            register_channel ──► channel registry ──► one Dispatcher per channel
//!           register_endpoint ──► endpoint registry ──(activate)──► dispatcher / direct channel
//!     register_source_adapter ──► TaskScheduler (polling) / Lifecycle list
//!
//! start():  activate endpoints ─► scheduler ─► dispatchers ─► lifecycle adapters
//! stop():   scheduler (grace) ─► adapters ─► dispatchers ─► endpoint tasks (grace)
//! ```
//!
//! ## Lifecycle
//! `uninitialized → initializing → initialized → starting → running → (stop) initialized`.
//! Transitions run under one async lifecycle monitor; the flags are atomics so
//! `is_running()` never waits. A stopped bus can be started again.
//!
//! ## Rules
//! - Every registration initializes the bus lazily (error channel + error handler).
//! - Endpoints registered while running are activated immediately; otherwise on `start()`.
//! - An endpoint is activated at most once.
//! - Endpoints without an error handler publish failures to `errorChannel`, unless they
//!   consume that channel themselves. Direct channel subscribers propagate failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{Lifecycle, SourceAdapter};
use crate::channels::{
    ChannelId, ChannelRef, ChannelRegistry, DefaultChannelRegistry, MessageChannel,
};
use crate::dispatch::Dispatcher;
use crate::endpoints::{
    ConcurrencyPolicy, DefaultEndpointRegistry, EndpointRegistry, MessageEndpoint,
    MessageHandler, Subscription, SubscriptionChannel, TargetRef,
};
use crate::error::{ConfigurationError, MessagingError, RuntimeError};
use crate::events::{Event, EventBus, EventKind};
use crate::messages::Message;
use crate::scheduling::{PropagatingErrorHandler, PublishingErrorHandler, TaskScheduler};
use crate::subscribers::{Subscribe, SubscriberSet};

use super::builder::MessageBusBuilder;
use super::config::BusConfig;
use super::shutdown;

/// Registry name of the error channel.
pub const ERROR_CHANNEL_NAME: &str = "errorChannel";

/// Default upper bound of in-flight deliveries across all dispatchers.
pub const DEFAULT_DISPATCHER_POOL_SIZE: usize = 10;

/// In-process message bus.
pub struct MessageBus {
    cfg: BusConfig,
    events: EventBus,
    channels: Arc<DefaultChannelRegistry>,
    endpoints: DefaultEndpointRegistry,
    dispatchers: RwLock<HashMap<ChannelId, Arc<Dispatcher>>>,
    scheduler: Arc<TaskScheduler>,
    pool: Option<Arc<Semaphore>>,
    adapters: RwLock<Vec<Arc<dyn Lifecycle>>>,
    lifecycle: Mutex<()>,
    initialized: AtomicBool,
    initializing: AtomicBool,
    starting: AtomicBool,
    running: AtomicBool,
    listener: CancellationToken,
}

impl MessageBus {
    /// Creates a bus without event subscribers.
    pub fn new(cfg: BusConfig) -> Self {
        Self::with_subscribers(cfg, Vec::new())
    }

    /// Starts a [`MessageBusBuilder`].
    pub fn builder(cfg: BusConfig) -> MessageBusBuilder {
        MessageBusBuilder::new(cfg)
    }

    /// Creates a bus whose runtime events are fanned out to `subscribers`.
    ///
    /// With subscribers, this must be called within a tokio runtime.
    pub fn with_subscribers(cfg: BusConfig, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let events = EventBus::new(cfg.event_capacity_clamped());
        let scheduler = TaskScheduler::new(events.clone())
            .with_grace(cfg.grace)
            .with_default_backoff(cfg.backoff)
            .with_default_timeout(cfg.task_timeout());
        let pool = cfg.pool_limit().map(|n| Arc::new(Semaphore::new(n)));

        let bus = Self {
            events,
            channels: Arc::new(DefaultChannelRegistry::new()),
            endpoints: DefaultEndpointRegistry::new(),
            dispatchers: RwLock::new(HashMap::new()),
            scheduler: Arc::new(scheduler),
            pool,
            adapters: RwLock::new(Vec::new()),
            lifecycle: Mutex::new(()),
            initialized: AtomicBool::new(false),
            initializing: AtomicBool::new(false),
            starting: AtomicBool::new(false),
            running: AtomicBool::new(false),
            listener: CancellationToken::new(),
            cfg,
        };
        if !subscribers.is_empty() {
            bus.subscriber_listener(SubscriberSet::new(subscribers, bus.events.clone()));
        }
        bus
    }

    /// Forwards bus events to the subscriber set until the bus is dropped.
    fn subscriber_listener(&self, set: SubscriberSet) {
        let mut rx = self.events.subscribe();
        let token = self.listener.clone();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = token.cancelled() => break,
                    r = rx.recv() => r,
                };
                match received {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener lagged, events skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            set.shutdown().await;
        });
    }

    /// Configuration.
    pub fn config(&self) -> &BusConfig {
        &self.cfg
    }

    /// Runtime event bus; subscribe to observe the bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The task scheduler shared by dispatchers and source adapters.
    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    // ---- lifecycle ----

    /// Registers the default error channel (if none) and installs the publishing error
    /// handler on the scheduler. Idempotent.
    pub async fn initialize(&self) {
        if self.initialized.load(AtomicOrdering::Acquire) {
            return;
        }
        let _monitor = self.lifecycle.lock().await;
        if self.initialized.load(AtomicOrdering::Acquire)
            || self.initializing.swap(true, AtomicOrdering::AcqRel)
        {
            return;
        }

        let error_channel = match self.channels.lookup_channel(ERROR_CHANNEL_NAME).await {
            Some(channel) => Some(channel),
            None => {
                let channel: ChannelRef =
                    Arc::new(MessageChannel::queue(self.cfg.error_channel_capacity));
                match self.do_register_channel(ERROR_CHANNEL_NAME, channel.clone()).await {
                    Ok(()) => Some(channel),
                    Err(e) => {
                        warn!(error = %e, "failed to register the default error channel");
                        None
                    }
                }
            }
        };

        let mut handler = PublishingErrorHandler::new(self.channels.clone());
        if let Some(channel) = error_channel {
            handler = handler.with_fallback(channel);
        }
        self.scheduler.set_error_handler(Arc::new(handler)).await;

        self.initialized.store(true, AtomicOrdering::Release);
        self.initializing.store(false, AtomicOrdering::Release);
        debug!("message bus initialized");
    }

    /// Activates all endpoints, then starts the scheduler, dispatchers and lifecycle
    /// source adapters. No-op if running or starting.
    ///
    /// If an endpoint fails to activate, the bus stays stopped and the error is returned.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        self.initialize().await;
        if self.is_running() || self.starting.load(AtomicOrdering::Acquire) {
            return Ok(());
        }
        let _monitor = self.lifecycle.lock().await;
        if self.is_running() || self.starting.swap(true, AtomicOrdering::AcqRel) {
            return Ok(());
        }

        if let Err(e) = self.activate_endpoints().await {
            self.starting.store(false, AtomicOrdering::Release);
            warn!(error = %e, "message bus failed to start");
            return Err(e.into());
        }

        self.scheduler.start().await;
        for dispatcher in self.dispatcher_snapshot().await {
            dispatcher.start().await;
            info!(channel = dispatcher.channel().name(), "started dispatcher");
        }
        for adapter in self.adapters.read().await.iter() {
            adapter.start().await;
        }

        self.running.store(true, AtomicOrdering::Release);
        self.starting.store(false, AtomicOrdering::Release);
        info!("message bus started");
        self.events.publish(Event::new(EventKind::BusStarted));
        Ok(())
    }

    /// Stops the scheduler (waiting up to the grace period), the source adapters and the
    /// dispatchers, then waits up to the grace period for messages endpoints still handle
    /// on spawned tasks. No-op unless running.
    ///
    /// Anything still running after the grace period is aborted and named in
    /// [`RuntimeError::GraceExceeded`].
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        if !self.is_running() {
            return Ok(());
        }
        let _monitor = self.lifecycle.lock().await;
        if !self.running.swap(false, AtomicOrdering::AcqRel) {
            return Ok(());
        }

        let stopped = self.scheduler.stop().await;
        for adapter in self.adapters.read().await.iter() {
            adapter.stop().await;
        }
        for dispatcher in self.dispatcher_snapshot().await {
            dispatcher.stop().await;
        }
        let aborted = self.drain_endpoints().await;

        info!("message bus stopped");
        self.events.publish(Event::new(EventKind::BusStopped));
        match stopped {
            Ok(()) if aborted.is_empty() => Ok(()),
            Ok(()) => {
                self.events.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(aborted.join(", ")),
                );
                Err(RuntimeError::GraceExceeded {
                    grace: self.cfg.grace,
                    stuck: aborted,
                })
            }
            Err(RuntimeError::GraceExceeded { grace, mut stuck }) => {
                stuck.extend(aborted);
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
            Err(e) => Err(e),
        }
    }

    /// Drains every endpoint concurrently; returns the names of those that had work aborted.
    async fn drain_endpoints(&self) -> Vec<String> {
        let mut endpoints = Vec::new();
        for name in self.endpoints.endpoint_names().await {
            if let Some(endpoint) = self.endpoints.lookup_endpoint(&name).await {
                endpoints.push(endpoint);
            }
        }
        let grace = self.cfg.grace;
        let aborted = join_all(endpoints.iter().map(|e| e.drain(grace))).await;
        endpoints
            .iter()
            .zip(aborted)
            .filter(|(_, n)| *n > 0)
            .map(|(e, _)| e.name().to_string())
            .collect()
    }

    /// True between a successful `start()` and `stop()`.
    pub fn is_running(&self) -> bool {
        self.running.load(AtomicOrdering::Acquire)
    }

    /// Starts the bus, waits for SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere), then stops it.
    pub async fn run_until_shutdown(&self) -> Result<(), RuntimeError> {
        self.start().await?;
        shutdown::wait_for_shutdown_signal().await?;
        info!("shutdown signal received");
        self.events.publish(Event::new(EventKind::ShutdownRequested));
        self.stop().await
    }

    // ---- channels ----

    /// The channel registered as `errorChannel`.
    pub async fn error_channel(&self) -> Option<ChannelRef> {
        self.channels.lookup_channel(ERROR_CHANNEL_NAME).await
    }

    /// Registers `channel` as `errorChannel`.
    pub async fn set_error_channel(&self, channel: ChannelRef) -> Result<(), ConfigurationError> {
        self.register_channel(ERROR_CHANNEL_NAME, channel).await
    }

    /// Channel registered under `name`.
    pub async fn lookup_channel(&self, name: &str) -> Option<ChannelRef> {
        self.channels.lookup_channel(name).await
    }

    /// Sorted names of all registered channels.
    pub async fn channel_names(&self) -> Vec<String> {
        self.channels.names().await
    }

    /// Names `channel`, creates its dispatcher and registers both.
    pub async fn register_channel(
        &self,
        name: &str,
        channel: ChannelRef,
    ) -> Result<(), ConfigurationError> {
        self.initialize().await;
        self.do_register_channel(name, channel).await
    }

    async fn do_register_channel(
        &self,
        name: &str,
        channel: ChannelRef,
    ) -> Result<(), ConfigurationError> {
        let replaced = self.channels.insert(name, channel.clone()).await?;

        let retired = {
            let mut dispatchers = self.dispatchers.write().await;
            let retired = replaced
                .filter(|old| old.id() != channel.id())
                .and_then(|old| dispatchers.remove(&old.id()));
            dispatchers.entry(channel.id()).or_insert_with(|| {
                Arc::new(Dispatcher::new(
                    channel.clone(),
                    Arc::clone(&self.scheduler),
                    self.events.clone(),
                    self.pool.clone(),
                ))
            });
            retired
        };
        if let Some(dispatcher) = retired {
            dispatcher.stop().await;
        }

        info!("registered channel '{name}'");
        self.events
            .publish(Event::new(EventKind::ChannelRegistered).with_channel(name));
        Ok(())
    }

    /// Removes the channel and stops its dispatcher. Returns the removed channel.
    pub async fn unregister_channel(&self, name: &str) -> Option<ChannelRef> {
        let removed = self.channels.unregister_channel(name).await?;
        let dispatcher = self.dispatchers.write().await.remove(&removed.id());
        if let Some(dispatcher) = dispatcher {
            if dispatcher.is_running() {
                dispatcher.stop().await;
            }
        }
        info!("unregistered channel '{name}'");
        self.events
            .publish(Event::new(EventKind::ChannelUnregistered).with_channel(name));
        Some(removed)
    }

    /// Sends `message` to the channel registered under `channel`, honoring the configured
    /// send timeout.
    pub async fn send(&self, channel: &str, message: Message) -> Result<(), MessagingError> {
        let target = self
            .lookup_channel(channel)
            .await
            .ok_or_else(|| MessagingError::UnknownChannel {
                channel: channel.to_string(),
            })?;
        target.send_timeout(message, self.cfg.send_timeout()).await
    }

    // ---- endpoints ----

    /// Registers a handler endpoint with the default concurrency policy.
    pub async fn register_handler(
        &self,
        name: &str,
        handler: Arc<dyn MessageHandler>,
        subscription: Subscription,
    ) -> Result<Arc<MessageEndpoint>, ConfigurationError> {
        let endpoint = MessageEndpoint::handler(handler).with_subscription(subscription);
        self.register_new(name, endpoint).await
    }

    /// Registers a handler endpoint with an explicit concurrency policy.
    pub async fn register_handler_with(
        &self,
        name: &str,
        handler: Arc<dyn MessageHandler>,
        subscription: Subscription,
        policy: ConcurrencyPolicy,
    ) -> Result<Arc<MessageEndpoint>, ConfigurationError> {
        let endpoint = MessageEndpoint::handler(handler)
            .with_subscription(subscription)
            .with_concurrency(policy);
        self.register_new(name, endpoint).await
    }

    /// Registers a target endpoint with the default concurrency policy.
    pub async fn register_target(
        &self,
        name: &str,
        target: TargetRef,
        subscription: Subscription,
    ) -> Result<Arc<MessageEndpoint>, ConfigurationError> {
        let endpoint = MessageEndpoint::target(target).with_subscription(subscription);
        self.register_new(name, endpoint).await
    }

    /// Registers a target endpoint with an explicit concurrency policy.
    pub async fn register_target_with(
        &self,
        name: &str,
        target: TargetRef,
        subscription: Subscription,
        policy: ConcurrencyPolicy,
    ) -> Result<Arc<MessageEndpoint>, ConfigurationError> {
        let endpoint = MessageEndpoint::target(target)
            .with_subscription(subscription)
            .with_concurrency(policy);
        self.register_new(name, endpoint).await
    }

    async fn register_new(
        &self,
        name: &str,
        endpoint: MessageEndpoint,
    ) -> Result<Arc<MessageEndpoint>, ConfigurationError> {
        let endpoint = Arc::new(endpoint);
        self.register_endpoint(name, endpoint.clone()).await?;
        Ok(endpoint)
    }

    /// Registers `endpoint`, activating it right away if the bus is running.
    pub async fn register_endpoint(
        &self,
        name: &str,
        endpoint: Arc<MessageEndpoint>,
    ) -> Result<(), ConfigurationError> {
        self.initialize().await;
        endpoint.prepare(self.channels.clone(), self.cfg.default_concurrency);

        if let Some(old) = self.endpoints.insert(name, endpoint.clone()).await? {
            if !Arc::ptr_eq(&old, &endpoint) {
                self.detach(&old).await;
            }
        }
        info!("registered endpoint '{name}'");
        self.events
            .publish(Event::new(EventKind::EndpointRegistered).with_endpoint(name));

        if self.is_running() {
            self.activate_endpoint(&endpoint).await?;
        }
        Ok(())
    }

    /// Removes the endpoint from the registry, every dispatcher and every direct channel.
    pub async fn unregister_endpoint(&self, name: &str) -> Option<Arc<MessageEndpoint>> {
        let endpoint = self.endpoints.unregister_endpoint(name).await?;
        self.detach(&endpoint).await;
        info!("unregistered endpoint '{name}'");
        self.events
            .publish(Event::new(EventKind::EndpointUnregistered).with_endpoint(name));
        Some(endpoint)
    }

    /// Endpoint registered under `name`.
    pub async fn lookup_endpoint(&self, name: &str) -> Option<Arc<MessageEndpoint>> {
        self.endpoints.lookup_endpoint(name).await
    }

    /// Sorted names of all registered endpoints.
    pub async fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.endpoint_names().await
    }

    async fn detach(&self, endpoint: &Arc<MessageEndpoint>) {
        let target: TargetRef = endpoint.clone();
        for dispatcher in self.dispatcher_snapshot().await {
            dispatcher.remove_target(&target).await;
        }
        for channel in self.channels.channels().await {
            if channel.is_direct() {
                channel.unsubscribe(&target).await;
            }
        }
        endpoint.mark_deactivated();
    }

    async fn activate_endpoints(&self) -> Result<(), ConfigurationError> {
        for name in self.endpoints.endpoint_names().await {
            if let Some(endpoint) = self.endpoints.lookup_endpoint(&name).await {
                self.activate_endpoint(&endpoint).await?;
            }
        }
        Ok(())
    }

    async fn activate_endpoint(&self, endpoint: &Arc<MessageEndpoint>) -> Result<(), ConfigurationError> {
        if endpoint.is_activated() {
            return Ok(());
        }
        let name = endpoint.name().to_string();
        let subscription =
            endpoint
                .subscription()
                .ok_or_else(|| ConfigurationError::MissingSubscription {
                    endpoint: name.clone(),
                })?;

        let channel = match subscription.channel() {
            SubscriptionChannel::Channel(channel) => channel.clone(),
            SubscriptionChannel::Name(channel) => {
                self.resolve_channel(channel, &name, false).await?
            }
        };
        if let Some(output) = endpoint.default_output() {
            self.resolve_channel(output, &name, true).await?;
        }

        let schedule = subscription.schedule();
        if channel.is_direct() && schedule.is_some() {
            return Err(ConfigurationError::PolledDirectChannel {
                channel: channel.name().to_string(),
                endpoint: name,
            });
        }

        if !endpoint.has_error_handler().await {
            let consumes_errors = self
                .error_channel()
                .await
                .is_some_and(|errors| errors.id() == channel.id());
            if !consumes_errors {
                let handler = PublishingErrorHandler::new(self.channels.clone());
                endpoint.set_error_handler(Arc::new(handler)).await;
            }
        }

        let target: TargetRef = endpoint.clone();
        if channel.is_direct() {
            channel.subscribe(target).await;
            endpoint
                .set_error_handler(Arc::new(PropagatingErrorHandler))
                .await;
        } else {
            let dispatcher = self.dispatchers.read().await.get(&channel.id()).cloned();
            match dispatcher {
                Some(dispatcher) => {
                    dispatcher.add_target(target, schedule).await;
                    if self.is_running() && !dispatcher.is_running() {
                        dispatcher.start().await;
                    }
                }
                None => {
                    warn!(
                        "no dispatcher available for channel '{}', be sure to register the channel",
                        channel.name()
                    );
                }
            }
        }

        endpoint.mark_activated();
        info!(
            "activated subscription to channel '{}' for endpoint '{name}'",
            channel.name()
        );
        self.events.publish(
            Event::new(EventKind::EndpointActivated)
                .with_endpoint(name)
                .with_channel(channel.name()),
        );
        Ok(())
    }

    /// Looks up `channel`, creating a queue channel when auto-creation is enabled.
    async fn resolve_channel(
        &self,
        channel: &str,
        endpoint: &str,
        output: bool,
    ) -> Result<ChannelRef, ConfigurationError> {
        if let Some(found) = self.channels.lookup_channel(channel).await {
            return Ok(found);
        }
        if !self.cfg.auto_create_channels {
            return Err(if output {
                ConfigurationError::UnknownOutputChannel {
                    channel: channel.to_string(),
                    endpoint: endpoint.to_string(),
                }
            } else {
                ConfigurationError::UnknownChannel {
                    channel: channel.to_string(),
                }
            });
        }

        info!("auto-creating channel '{channel}'");
        let created: ChannelRef = Arc::new(MessageChannel::queue(self.cfg.queue_capacity));
        self.do_register_channel(channel, created.clone()).await?;
        self.events.publish(
            Event::new(EventKind::ChannelAutoCreated)
                .with_channel(channel)
                .with_endpoint(endpoint),
        );
        Ok(created)
    }

    // ---- source adapters ----

    /// Schedules the adapter's polling task and tracks its lifecycle; a running bus
    /// starts the adapter immediately.
    pub async fn register_source_adapter(&self, name: &str, adapter: Arc<dyn SourceAdapter>) {
        self.initialize().await;
        if let Some(spec) = Arc::clone(&adapter).task(name) {
            self.scheduler.schedule(spec).await;
        }
        if let Some(lifecycle) = adapter.lifecycle() {
            self.adapters.write().await.push(Arc::clone(&lifecycle));
            if self.is_running() {
                lifecycle.start().await;
            }
        }
        info!("registered source adapter '{name}'");
        self.events
            .publish(Event::new(EventKind::SourceAdapterRegistered).with_task(name));
    }

    async fn dispatcher_snapshot(&self) -> Vec<Arc<Dispatcher>> {
        self.dispatchers.read().await.values().cloned().collect()
    }

    /// Dispatcher of the channel registered under `name`.
    pub async fn dispatcher(&self, name: &str) -> Option<Arc<Dispatcher>> {
        let channel = self.lookup_channel(name).await?;
        self.dispatchers.read().await.get(&channel.id()).cloned()
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.listener.cancel();
    }
}

#[async_trait]
impl ChannelRegistry for MessageBus {
    async fn lookup_channel(&self, name: &str) -> Option<ChannelRef> {
        MessageBus::lookup_channel(self, name).await
    }

    async fn register_channel(
        &self,
        name: &str,
        channel: ChannelRef,
    ) -> Result<(), ConfigurationError> {
        MessageBus::register_channel(self, name, channel).await
    }

    async fn unregister_channel(&self, name: &str) -> Option<ChannelRef> {
        MessageBus::unregister_channel(self, name).await
    }
}

#[async_trait]
impl EndpointRegistry for MessageBus {
    async fn register_endpoint(
        &self,
        name: &str,
        endpoint: Arc<MessageEndpoint>,
    ) -> Result<(), ConfigurationError> {
        MessageBus::register_endpoint(self, name, endpoint).await
    }

    async fn unregister_endpoint(&self, name: &str) -> Option<Arc<MessageEndpoint>> {
        MessageBus::unregister_endpoint(self, name).await
    }

    async fn lookup_endpoint(&self, name: &str) -> Option<Arc<MessageEndpoint>> {
        MessageBus::lookup_endpoint(self, name).await
    }

    async fn endpoint_names(&self) -> Vec<String> {
        MessageBus::endpoint_names(self).await
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("initialized", &self.initialized.load(AtomicOrdering::Relaxed))
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::endpoints::{HandlerFn, Schedule, TargetFn};

    fn recorder(seen: Arc<Mutex<Vec<Message>>>) -> TargetRef {
        TargetFn::arc(move |msg: Message| {
            let seen = seen.clone();
            async move {
                seen.lock().await.push(msg);
                Ok::<_, MessagingError>(())
            }
        })
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn initialize_registers_error_channel_once() {
        let bus = MessageBus::new(BusConfig::default());
        bus.initialize().await;
        bus.initialize().await;

        let errors = bus.error_channel().await.unwrap();
        assert_eq!(errors.name(), ERROR_CHANNEL_NAME);
        assert_eq!(bus.channel_names().await, vec![ERROR_CHANNEL_NAME.to_string()]);
        assert!(bus.scheduler().error_handler().await.is_some());
    }

    #[tokio::test]
    async fn custom_error_channel_is_kept() {
        let bus = MessageBus::new(BusConfig::default());
        let custom: ChannelRef = Arc::new(MessageChannel::queue(5));
        bus.set_error_channel(custom.clone()).await.unwrap();

        let errors = bus.error_channel().await.unwrap();
        assert_eq!(errors.id(), custom.id());
    }

    #[tokio::test]
    async fn register_channel_creates_a_dispatcher() {
        let bus = MessageBus::new(BusConfig::default());
        bus.register_channel("orders", Arc::new(MessageChannel::queue(4)))
            .await
            .unwrap();

        let channel = bus.lookup_channel("orders").await.unwrap();
        assert_eq!(channel.name(), "orders");
        assert!(bus.dispatcher("orders").await.is_some());

        let removed = bus.unregister_channel("orders").await.unwrap();
        assert_eq!(removed.id(), channel.id());
        assert!(bus.lookup_channel("orders").await.is_none());
        assert!(bus.dispatcher("orders").await.is_none());
    }

    #[tokio::test]
    async fn missing_subscription_fails_start() {
        let bus = MessageBus::new(BusConfig::default());
        let endpoint = Arc::new(MessageEndpoint::target(TargetFn::arc(|_m: Message| async {
            Ok::<_, MessagingError>(())
        })));
        bus.register_endpoint("lonely", endpoint).await.unwrap();

        let err = bus.start().await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Configuration(ConfigurationError::MissingSubscription { .. })
        ));
        assert!(!bus.is_running());
    }

    #[tokio::test]
    async fn handler_replies_reach_the_default_output() {
        let bus = MessageBus::new(BusConfig {
            auto_create_channels: true,
            ..BusConfig::default()
        });
        let doubler = HandlerFn::arc(|msg: Message| async move {
            let n = msg.payload().as_i64().unwrap_or_default();
            Ok::<_, MessagingError>(Some(msg.reply(n * 2)))
        });
        let endpoint = Arc::new(
            MessageEndpoint::handler(doubler)
                .with_subscription(Subscription::to_name("numbers"))
                .with_default_output("doubled"),
        );
        bus.register_endpoint("doubler", endpoint).await.unwrap();
        bus.start().await.unwrap();

        bus.send("numbers", Message::new(21)).await.unwrap();
        let doubled = bus.lookup_channel("doubled").await.unwrap();
        let reply = doubled
            .receive_timeout(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply.payload(), &json!(42));
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn scheduled_subscription_on_direct_channel_is_rejected() {
        let bus = MessageBus::new(BusConfig::default());
        bus.register_channel("sync", Arc::new(MessageChannel::direct()))
            .await
            .unwrap();
        bus.start().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let err = bus
            .register_target(
                "poller",
                recorder(seen),
                Subscription::to_name("sync")
                    .with_schedule(Schedule::fixed_delay(Duration::from_millis(10))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::PolledDirectChannel { .. }));
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn endpoint_registered_while_running_is_activated() {
        let bus = MessageBus::new(BusConfig::default());
        bus.register_channel("in", Arc::new(MessageChannel::queue(4)))
            .await
            .unwrap();
        bus.start().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let endpoint = bus
            .register_target("sink", recorder(seen.clone()), Subscription::to_name("in"))
            .await
            .unwrap();
        assert!(endpoint.is_activated());

        bus.send("in", Message::new("hello")).await.unwrap();
        eventually(|| {
            let seen = seen.clone();
            async move { seen.lock().await.len() == 1 }
        })
        .await;
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn restart_keeps_delivering() {
        let bus = MessageBus::new(BusConfig::default());
        bus.register_channel("in", Arc::new(MessageChannel::queue(4)))
            .await
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.register_target("sink", recorder(seen.clone()), Subscription::to_name("in"))
            .await
            .unwrap();

        bus.start().await.unwrap();
        bus.stop().await.unwrap();
        bus.start().await.unwrap();

        bus.send("in", Message::new(1)).await.unwrap();
        eventually(|| {
            let seen = seen.clone();
            async move { seen.lock().await.len() == 1 }
        })
        .await;
        bus.stop().await.unwrap();
        assert_eq!(bus.dispatcher("in").await.unwrap().target_count().await, 1);
    }
}
