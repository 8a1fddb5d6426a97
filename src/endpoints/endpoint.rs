//! # Message endpoints.
//!
//! A [`MessageEndpoint`] wraps the processing logic (a [`MessageHandler`] or a plain
//! [`Target`]) together with its subscription and delivery settings. The endpoint itself is
//! a [`Target`]: dispatchers and direct channels deliver to it.
//!
//! ## Delivery flow
//! ```text
//! send(msg)
//!   ├─ concurrency policy? ── yes ─► admit → spawn { permit → invoke(msg) }   (returns Ok now)
//!   └─ no ─► invoke(msg)
//!
//! invoke(msg)
//!   ├─ Handler: handle(msg) ─► Some(reply) ─► return_address ▸ default_output ▸ drop (warn)
//!   ├─ Target:  target.send(msg)
//!   └─ Err(e) ─► error handler set? ── yes ─► handler.handle(e, msg)
//!                                   └─ no  ─► Err(e) to the caller
//! ```
//!
//! ## Rules
//! - The name is assigned once, at registration.
//! - Output and reply channels are resolved through the channel registry injected at
//!   registration; replies inherit the request's correlation id and error channel.
//! - Activation state guards against attaching the endpoint twice.
//! - Spawned invocations are tracked; `drain` waits for them up to a grace period and
//!   aborts the rest.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::warn;

use crate::channels::ChannelRegistry;
use crate::error::{ConfigurationError, MessagingError};
use crate::messages::Message;
use crate::scheduling::ErrorHandler;

use super::concurrency::{ConcurrencyPolicy, Gate};
use super::handler::MessageHandler;
use super::subscription::Subscription;
use super::target::{Target, TargetRef};

const UNNAMED: &str = "<unnamed>";

/// Processing logic of an endpoint.
#[derive(Clone)]
pub enum EndpointKind {
    /// Request/reply logic with an optional default output channel.
    Handler {
        /// The handler.
        handler: Arc<dyn MessageHandler>,
        /// Channel name for replies to requests without a return address.
        default_output: Option<Arc<str>>,
    },
    /// One-way consumer.
    Target {
        /// The target.
        target: TargetRef,
    },
}

/// Named unit of message-processing logic subscribed to a channel.
pub struct MessageEndpoint {
    name: OnceLock<Arc<str>>,
    kind: EndpointKind,
    subscription: Option<Subscription>,
    concurrency: Option<ConcurrencyPolicy>,
    gate: OnceLock<Gate>,
    error_handler: RwLock<Option<Arc<dyn ErrorHandler>>>,
    channels: OnceLock<Arc<dyn ChannelRegistry>>,
    inflight: Mutex<JoinSet<()>>,
    activated: AtomicBool,
}

impl MessageEndpoint {
    /// Creates a handler endpoint.
    pub fn handler(handler: Arc<dyn MessageHandler>) -> Self {
        Self::with_kind(EndpointKind::Handler {
            handler,
            default_output: None,
        })
    }

    /// Creates a target endpoint.
    pub fn target(target: TargetRef) -> Self {
        Self::with_kind(EndpointKind::Target { target })
    }

    fn with_kind(kind: EndpointKind) -> Self {
        Self {
            name: OnceLock::new(),
            kind,
            subscription: None,
            concurrency: None,
            gate: OnceLock::new(),
            error_handler: RwLock::new(None),
            channels: OnceLock::new(),
            inflight: Mutex::new(JoinSet::new()),
            activated: AtomicBool::new(false),
        }
    }

    /// Sets the subscription.
    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = Some(subscription);
        self
    }

    /// Sets the default output channel (handler endpoints only; ignored for targets).
    pub fn with_default_output(mut self, channel: impl Into<Arc<str>>) -> Self {
        if let EndpointKind::Handler { default_output, .. } = &mut self.kind {
            *default_output = Some(channel.into());
        }
        self
    }

    /// Sets the concurrency policy (otherwise the bus default applies at registration).
    pub fn with_concurrency(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrency = Some(policy);
        self
    }

    /// Sets the error handler (otherwise the bus installs one on activation).
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = RwLock::new(Some(handler));
        self
    }

    /// Registered name, or `"<unnamed>"` before registration.
    pub fn name(&self) -> &str {
        self.name.get().map(|n| n.as_ref()).unwrap_or(UNNAMED)
    }

    /// Processing logic.
    pub fn kind(&self) -> &EndpointKind {
        &self.kind
    }

    /// Subscription metadata.
    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    /// Default output channel name of a handler endpoint.
    pub fn default_output(&self) -> Option<&str> {
        match &self.kind {
            EndpointKind::Handler { default_output, .. } => default_output.as_deref(),
            EndpointKind::Target { .. } => None,
        }
    }

    /// Effective concurrency policy.
    pub fn concurrency(&self) -> Option<ConcurrencyPolicy> {
        self.gate.get().map(Gate::policy).or(self.concurrency)
    }

    /// True once the endpoint is attached to its channel or dispatcher.
    pub fn is_activated(&self) -> bool {
        self.activated.load(AtomicOrdering::Acquire)
    }

    /// True when an error handler is installed.
    pub async fn has_error_handler(&self) -> bool {
        self.error_handler.read().await.is_some()
    }

    pub(crate) async fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        *self.error_handler.write().await = Some(handler);
    }

    pub(crate) fn assign_name(&self, name: &str) -> Result<(), ConfigurationError> {
        let current = self.name.get_or_init(|| Arc::from(name));
        if current.as_ref() == name {
            Ok(())
        } else {
            Err(ConfigurationError::Renamed {
                current: current.to_string(),
                requested: name.to_string(),
            })
        }
    }

    /// Injects the channel registry and freezes the concurrency policy.
    pub(crate) fn prepare(
        &self,
        channels: Arc<dyn ChannelRegistry>,
        default_policy: Option<ConcurrencyPolicy>,
    ) {
        let _ = self.channels.set(channels);
        if let Some(policy) = self.concurrency.or(default_policy) {
            let _ = self.gate.set(Gate::new(policy));
        }
    }

    pub(crate) fn mark_activated(&self) {
        self.activated.store(true, AtomicOrdering::Release);
    }

    pub(crate) fn mark_deactivated(&self) {
        self.activated.store(false, AtomicOrdering::Release);
    }

    /// Waits up to `grace` for messages still handled on spawned tasks, then aborts the
    /// stragglers. Returns how many were aborted.
    pub(crate) async fn drain(&self, grace: Duration) -> usize {
        let mut set = std::mem::take(&mut *self.inflight.lock().await);
        if set.is_empty() {
            return 0;
        }

        let drained = tokio::time::timeout(grace, async {
            while set.join_next().await.is_some() {}
        })
        .await;
        if drained.is_ok() {
            return 0;
        }

        let aborted = set.len();
        set.abort_all();
        while set.join_next().await.is_some() {}
        warn!(endpoint = %self.name(), aborted, "in-flight messages aborted after grace period");
        aborted
    }

    fn name_arc(&self) -> Arc<str> {
        self.name.get().cloned().unwrap_or_else(|| Arc::from(UNNAMED))
    }
}

#[async_trait]
impl Target for MessageEndpoint {
    async fn send(&self, message: Message) -> Result<(), MessagingError> {
        let invocation = Invocation {
            endpoint: self.name_arc(),
            kind: self.kind.clone(),
            channels: self.channels.get().cloned(),
            errors: self.error_handler.read().await.clone(),
        };

        let Some(gate) = self.gate.get() else {
            return invocation.run(message).await;
        };

        let ticket = gate.admit().ok_or_else(|| MessagingError::Rejected {
            endpoint: self.name().to_string(),
            reason: "concurrency backlog is full".to_string(),
        })?;

        let mut inflight = self.inflight.lock().await;
        while inflight.try_join_next().is_some() {}
        inflight.spawn(async move {
            let Some(_permit) = ticket.acquire().await else {
                return;
            };
            let endpoint = Arc::clone(&invocation.endpoint);
            if let Err(e) = invocation.run(message).await {
                warn!(endpoint = %endpoint, error = %e, "message handling failed");
            }
            drop(ticket);
        });
        Ok(())
    }
}

impl std::fmt::Debug for MessageEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            EndpointKind::Handler { .. } => "handler",
            EndpointKind::Target { .. } => "target",
        };
        f.debug_struct("MessageEndpoint")
            .field("name", &self.name())
            .field("kind", &kind)
            .field("subscription", &self.subscription)
            .field("concurrency", &self.concurrency())
            .field("activated", &self.is_activated())
            .finish()
    }
}

/// Everything needed to process one message, detached from the endpoint.
struct Invocation {
    endpoint: Arc<str>,
    kind: EndpointKind,
    channels: Option<Arc<dyn ChannelRegistry>>,
    errors: Option<Arc<dyn ErrorHandler>>,
}

impl Invocation {
    async fn run(self, message: Message) -> Result<(), MessagingError> {
        let outcome = match &self.kind {
            EndpointKind::Handler {
                handler,
                default_output,
            } => match handler.handle(message.clone()).await {
                Ok(Some(reply)) => {
                    self.route_reply(&message, reply, default_output.as_deref())
                        .await
                }
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            },
            EndpointKind::Target { target } => target.send(message.clone()).await,
        };

        match (outcome, &self.errors) {
            (Ok(()), _) => Ok(()),
            (Err(e), Some(handler)) => handler.handle(e, Some(&message)).await,
            (Err(e), None) => Err(e),
        }
    }

    async fn route_reply(
        &self,
        request: &Message,
        mut reply: Message,
        default_output: Option<&str>,
    ) -> Result<(), MessagingError> {
        let destination = request
            .headers()
            .return_address
            .as_deref()
            .or(default_output);
        let Some(destination) = destination else {
            warn!(
                endpoint = %self.endpoint,
                message_id = request.id(),
                "reply dropped: no return address and no default output channel"
            );
            return Ok(());
        };

        if reply.correlation_id().is_none() {
            reply = reply.with_correlation_id(request.id());
        }
        if reply.headers().error_channel.is_none() {
            if let Some(errors) = &request.headers().error_channel {
                reply = reply.with_error_channel(Arc::clone(errors));
            }
        }

        let channel = match &self.channels {
            Some(registry) => registry.lookup_channel(destination).await,
            None => None,
        };
        match channel {
            Some(channel) => channel.send(reply).await,
            None => Err(MessagingError::UnknownChannel {
                channel: destination.to_string(),
            }),
        }
    }
}
