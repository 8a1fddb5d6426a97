//! Messages: immutable payload + headers.
//!
//! - [`Message`] carries a JSON payload and a globally ordered id
//! - [`MessageHeaders`] holds routing metadata (correlation, return address, error channel)
//!   and free-form attributes

mod headers;
mod message;

pub use headers::MessageHeaders;
pub use message::{ERROR_LABEL_ATTRIBUTE, FAILED_MESSAGE_ATTRIBUTE, Message};
