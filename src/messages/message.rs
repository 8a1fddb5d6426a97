//! # Message: the unit that travels through channels.
//!
//! A [`Message`] is immutable once sent; builders consume and return `self`.
//! Ids come from a global counter, so they are unique within the process and
//! increase monotonically in creation order.
//!
//! ## Example
//! ```rust
//! use msgbus::Message;
//! use serde_json::json;
//!
//! let request = Message::new(json!({"n": 21})).with_return_address("replies");
//! let reply = request.reply(json!(42));
//!
//! assert_eq!(reply.headers().correlation_id, Some(request.id()));
//! assert_eq!(reply.payload(), &json!(42));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde_json::{Value, json};

use crate::error::MessagingError;

use super::headers::MessageHeaders;

/// Attribute set on error messages; holds the label of the failure.
pub const ERROR_LABEL_ATTRIBUTE: &str = "error_label";

/// Attribute set on error messages; holds the id of the message whose processing failed.
pub const FAILED_MESSAGE_ATTRIBUTE: &str = "failed_message_id";

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(1);

/// JSON payload plus [`MessageHeaders`].
#[derive(Clone, Debug)]
pub struct Message {
    id: u64,
    headers: MessageHeaders,
    payload: Value,
}

impl Message {
    /// Creates a message with fresh headers and the next id.
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            id: MESSAGE_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            headers: MessageHeaders::now(),
            payload: payload.into(),
        }
    }

    /// Builds a reply: a new message correlated to this one's id.
    pub fn reply(&self, payload: impl Into<Value>) -> Self {
        Message::new(payload).with_correlation_id(self.id)
    }

    /// Builds an error message describing `error`.
    ///
    /// The payload is `{"error": <label>, "message": <text>}`. When `failed` is given, the
    /// error message is correlated to it and records its id under [`FAILED_MESSAGE_ATTRIBUTE`].
    pub fn error(error: &MessagingError, failed: Option<&Message>) -> Self {
        let mut msg = Message::new(json!({
            "error": error.as_label(),
            "message": error.to_string(),
        }))
        .with_attribute(ERROR_LABEL_ATTRIBUTE, error.as_label());

        if let Some(failed) = failed {
            msg = msg
                .with_correlation_id(failed.id)
                .with_attribute(FAILED_MESSAGE_ATTRIBUTE, failed.id);
        }
        msg
    }

    /// Unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Routing metadata.
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Consumes the message, returning its payload.
    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Shorthand for `headers().correlation_id`.
    pub fn correlation_id(&self) -> Option<u64> {
        self.headers.correlation_id
    }

    /// True for messages built by [`Message::error`].
    pub fn is_error(&self) -> bool {
        self.headers.attributes.contains_key(ERROR_LABEL_ATTRIBUTE)
    }

    /// Turns an error message back into a [`MessagingError::Remote`]; `None` for regular messages.
    pub fn as_remote_error(&self) -> Option<MessagingError> {
        if !self.is_error() {
            return None;
        }
        let field = |key: &str| {
            self.payload
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string()
        };
        Some(MessagingError::Remote {
            label: field("error"),
            message: field("message"),
        })
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: u64) -> Self {
        self.headers.correlation_id = Some(id);
        self
    }

    /// Sets the channel name replies should go to.
    pub fn with_return_address(mut self, channel: impl Into<Arc<str>>) -> Self {
        self.headers.return_address = Some(channel.into());
        self
    }

    /// Sets the channel name failures should be published to.
    pub fn with_error_channel(mut self, channel: impl Into<Arc<str>>) -> Self {
        self.headers.error_channel = Some(channel.into());
        self
    }

    /// Adds an application attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.attributes.insert(key.into(), value.into());
        self
    }
}
