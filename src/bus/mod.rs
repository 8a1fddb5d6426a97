//! # The message bus.
//!
//! - [`MessageBus`]: registries, dispatchers, scheduler and lifecycle.
//! - [`MessageBusBuilder`]: declarative wiring plus optional auto-start.
//! - [`BusConfig`]: tunables.

mod builder;
mod config;
mod message_bus;
mod shutdown;

pub use builder::MessageBusBuilder;
pub use config::BusConfig;
pub use message_bus::{DEFAULT_DISPATCHER_POOL_SIZE, ERROR_CHANNEL_NAME, MessageBus};
