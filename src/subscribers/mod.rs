//! # Event subscribers.
//!
//! Plug custom reactions to runtime [`Event`](crate::events::Event)s into the bus.
//!
//! ```text
//! EventBus ──► listener ──► SubscriberSet::emit
//!                                 ├──► [queue] ─► worker ─► LogWriter::on_event
//!                                 └──► [queue] ─► worker ─► Custom::on_event
//! ```
//!
//! ## Implementing a subscriber
//! ```no_run
//! use msgbus::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct FailureCounter;
//!
//! #[async_trait]
//! impl Subscribe for FailureCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::MessageFailed {
//!             // increment a counter
//!         }
//!     }
//!     fn name(&self) -> &'static str { "failure-counter" }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
