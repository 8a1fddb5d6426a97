//! Endpoints: message-processing units and their subscription metadata.
//!
//! ## Contents
//! - [`MessageHandler`] / [`HandlerFn`] request → optional reply logic
//! - [`Target`] / [`TargetFn`] one-way consumers (endpoints are targets too)
//! - [`MessageEndpoint`] named unit wiring logic to a [`Subscription`]
//! - [`Schedule`] polling schedule for subscriptions and source adapters
//! - [`ConcurrencyPolicy`] bounded asynchronous handling
//! - [`EndpointRegistry`] name → endpoint lookup

mod concurrency;
mod endpoint;
mod handler;
mod registry;
mod subscription;
mod target;

pub use concurrency::ConcurrencyPolicy;
pub use endpoint::{EndpointKind, MessageEndpoint};
pub use handler::{HandlerFn, HandlerResult, MessageHandler};
pub use registry::{DefaultEndpointRegistry, EndpointRegistry};
pub use subscription::{Schedule, Subscription, SubscriptionChannel};
pub use target::{Target, TargetFn, TargetRef};

pub(crate) use target::same_target;
