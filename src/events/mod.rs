//! Bus events: data model and broadcast channel.
//!
//! The message bus, its dispatchers, the task scheduler and the subscriber workers publish
//! [`Event`]s to an [`EventBus`]; a single listener fans them out to the configured
//! [`Subscribe`](crate::Subscribe) implementations.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] classification and metadata
//! - [`EventBus`] thin wrapper over `tokio::sync::broadcast`

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{Event, EventKind};
