use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;

/// Routing metadata attached to every [`Message`](crate::Message).
///
/// - `correlation_id`: id of the message this one answers (replies, error messages)
/// - `return_address`: channel name a handler reply should be sent to
/// - `error_channel`: channel name failures of this message should be published to
/// - `attributes`: free-form values for application use
#[derive(Clone, Debug)]
pub struct MessageHeaders {
    /// Creation time.
    pub timestamp: SystemTime,
    /// Id of the message this message correlates to.
    pub correlation_id: Option<u64>,
    /// Channel name for replies.
    pub return_address: Option<Arc<str>>,
    /// Channel name for failures; overrides the bus error channel.
    pub error_channel: Option<Arc<str>>,
    /// Application attributes.
    pub attributes: HashMap<String, Value>,
}

impl MessageHeaders {
    pub(crate) fn now() -> Self {
        Self {
            timestamp: SystemTime::now(),
            correlation_id: None,
            return_address: None,
            error_channel: None,
            attributes: HashMap::new(),
        }
    }

    /// Looks up an attribute.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}
