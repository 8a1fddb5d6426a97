//! # msgbus
//!
//! **msgbus** is an in-process message bus for async Rust.
//!
//! Producers send [`Message`]s to named channels; endpoints subscribed to those channels
//! consume them, optionally replying. The bus owns the wiring: registries for channels and
//! endpoints, one dispatcher per channel, a task scheduler for polling, and a lifecycle that
//! can be started and stopped repeatedly.
//!
//! ## Architecture
//! ```text
//!   Gateway ──request──► ┌──────────────────────────── MessageBus ────────────────────────────┐
//!   SourceAdapter ─────► │ channel registry      endpoint registry      TaskScheduler         │
//!                        │   "orders" ─────► Dispatcher ──┬─► drain loop ──► MessageEndpoint  │
//!                        │   (queue)                      └─► poller     ──► MessageEndpoint  │
//!                        │   "sync" (direct) ───────── inline ─────────────► MessageEndpoint  │
//!                        │   "errorChannel" ◄── PublishingErrorHandler ◄── failures          │
//!                        └──────────────────────────────┬─────────────────────────────────────┘
//!                                                       ▼
//!                                    EventBus ──► SubscriberSet ──► LogWriter / custom
//! ```
//!
//! ### Message flow through an endpoint
//! ```text
//! dispatcher ─► endpoint.send(msg)
//!                 ├─ concurrency policy: admit or reject (backlog full) ─► spawn
//!                 ├─ handler ─► reply ─► return address ▸ default output ▸ drop
//!                 └─ failure ─► error handler ─► error message ─► error channel
//! ```
//!
//! ## Features
//! | Area             | Description                                              | Key types                                   |
//! |------------------|----------------------------------------------------------|---------------------------------------------|
//! | **Messages**     | JSON payload + routing headers                           | [`Message`], [`MessageHeaders`]             |
//! | **Channels**     | Queue (pollable) and direct (inline) conduits            | [`MessageChannel`], [`ChannelRegistry`]     |
//! | **Endpoints**    | Handlers and targets with subscriptions                  | [`MessageEndpoint`], [`Subscription`]       |
//! | **Scheduling**   | Cancellable tasks with backoff and graceful stop         | [`TaskScheduler`], [`TaskSpec`]             |
//! | **Adapters**     | Pull messages in from outside                            | [`SourceAdapter`], [`PollingSourceAdapter`] |
//! | **Gateway**      | Request/reply with timeouts and reply futures            | [`Gateway`], [`ReplyFuture`]                |
//! | **Events**       | Runtime events for logging and metrics                   | [`Event`], [`Subscribe`]                    |
//! | **Errors**       | Typed errors with stable labels                          | [`MessagingError`], [`ConfigurationError`]  |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber (renders events via `tracing`).
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use msgbus::{BusConfig, HandlerFn, Message, MessageBus, MessageChannel, MessagingError, Subscription};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = MessageBus::new(BusConfig::default());
//!     bus.register_channel("in", Arc::new(MessageChannel::queue(16))).await?;
//!     bus.register_channel("out", Arc::new(MessageChannel::queue(16))).await?;
//!
//!     let upper = HandlerFn::arc(|msg: Message| async move {
//!         let text = msg.payload().as_str().unwrap_or_default().to_uppercase();
//!         Ok::<_, MessagingError>(Some(msg.reply(text)))
//!     });
//!     let endpoint = msgbus::MessageEndpoint::handler(upper)
//!         .with_subscription(Subscription::to_name("in"))
//!         .with_default_output("out");
//!     bus.register_endpoint("upper", Arc::new(endpoint)).await?;
//!     bus.start().await?;
//!
//!     bus.send("in", Message::new("hello")).await?;
//!     let out = bus.lookup_channel("out").await.expect("registered");
//!     let reply = out.receive().await.expect("reply");
//!     assert_eq!(reply.payload(), "HELLO");
//!
//!     bus.stop().await?;
//!     Ok(())
//! }
//! ```
mod adapters;
mod bus;
mod channels;
mod dispatch;
mod endpoints;
mod error;
mod events;
mod gateway;
mod messages;
mod scheduling;
mod subscribers;

// ---- Public re-exports ----

pub use adapters::{Lifecycle, MessageSource, PollingSourceAdapter, SourceAdapter, SourceFn};
pub use bus::{
    BusConfig, DEFAULT_DISPATCHER_POOL_SIZE, ERROR_CHANNEL_NAME, MessageBus, MessageBusBuilder,
};
pub use channels::{
    ChannelId, ChannelKind, ChannelRef, ChannelRegistry, DefaultChannelRegistry, DispatchMode,
    MessageChannel,
};
pub use dispatch::Dispatcher;
pub use endpoints::{
    ConcurrencyPolicy, DefaultEndpointRegistry, EndpointKind, EndpointRegistry, HandlerFn,
    HandlerResult, MessageEndpoint, MessageHandler, Schedule, Subscription, SubscriptionChannel,
    Target, TargetFn, TargetRef,
};
pub use error::{ConfigurationError, MessagingError, RuntimeError, TaskError};
pub use events::{Event, EventBus, EventKind};
pub use gateway::{Gateway, ReplyFuture};
pub use messages::{ERROR_LABEL_ATTRIBUTE, FAILED_MESSAGE_ATTRIBUTE, Message, MessageHeaders};
pub use scheduling::{
    BackoffPolicy, ErrorHandler, PropagatingErrorHandler, PublishingErrorHandler, Task,
    TaskFn, TaskHandle, TaskRef, TaskScheduler, TaskSpec, Trigger,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: the built-in `tracing` subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
