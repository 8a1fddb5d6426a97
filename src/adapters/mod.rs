//! # Source adapters: bring messages into the bus from outside.
//!
//! A [`SourceAdapter`] plays one or both roles:
//! - **scheduled task**: [`SourceAdapter::task`] returns a [`TaskSpec`](crate::TaskSpec)
//!   that the bus schedules at registration;
//! - **lifecycle**: [`SourceAdapter::lifecycle`] returns a [`Lifecycle`] started and
//!   stopped with the bus.
//!
//! [`PollingSourceAdapter`] is the stock scheduled adapter: it polls a [`MessageSource`]
//! and forwards everything to an output channel.

mod polling;
mod source;

pub use polling::PollingSourceAdapter;
pub use source::{Lifecycle, MessageSource, SourceAdapter, SourceFn};
