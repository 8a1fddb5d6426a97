//! # Dispatch: moving messages from channels to targets.
//!
//! - [`deliver`] applies a channel's [`DispatchMode`](crate::channels::DispatchMode) to one message.
//! - [`Dispatcher`] drains or polls one queue channel on the task scheduler.

mod delivery;
mod dispatcher;

pub(crate) use delivery::deliver;
pub use dispatcher::Dispatcher;
