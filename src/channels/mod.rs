//! Channels and the channel registry.
//!
//! - [`MessageChannel`] queue (pollable) or direct (synchronous) conduit
//! - [`DispatchMode`] point-to-point or broadcast delivery
//! - [`ChannelRegistry`] name → channel lookup, implemented by [`DefaultChannelRegistry`]
//!   and by [`MessageBus`](crate::MessageBus)

mod channel;
mod registry;

pub use channel::{ChannelId, ChannelKind, ChannelRef, DispatchMode, MessageChannel};
pub use registry::{ChannelRegistry, DefaultChannelRegistry};
