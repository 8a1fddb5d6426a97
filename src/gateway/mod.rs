//! # Request/reply gateway.
//!
//! ```text
//! request(payload) ──► request channel ──► handler endpoint
//!        │                                      │ reply (correlation_id = request id)
//!        ▼                                      ▼
//!   ReplyFuture ◄── pending[id] ◄── router ◄── "<name>.replies" (direct channel)
//! ```
//!
//! Requests carry the reply channel both as return address and as error channel, so
//! processing failures come back as error messages and resolve to
//! [`MessagingError::Remote`](crate::MessagingError::Remote).

mod gateway;

pub use gateway::{Gateway, ReplyFuture};
