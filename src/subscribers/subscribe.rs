//! # Subscriber contract.
//!
//! Each subscriber is driven by its own worker loop fed by a bounded queue owned by
//! the [`SubscriberSet`](crate::subscribers::SubscriberSet). A slow subscriber never blocks
//! the publisher or other subscribers; on overflow its events are dropped.

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name used in logs and overflow events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
