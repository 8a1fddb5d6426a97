//! # Event bus for runtime events.
//!
//! [`EventBus`] wraps [`tokio::sync::broadcast`]: publishing never blocks, and every
//! receiver sees events sent after it subscribed.
//!
//! ```text
//! MessageBus ──┐
//! Dispatchers ─┼──► EventBus ───► listener ───► SubscriberSet ──► Subscribe::on_event
//! Scheduler ───┤   (ring buffer)
//! Subscribers ─┘
//! ```
//!
//! ## Rules
//! - Bounded: one ring buffer of `capacity` events shared by all receivers (min 1).
//! - Lagging receivers observe `RecvError::Lagged(n)` and skip the `n` oldest events.
//! - No persistence: with no receiver, events are dropped.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for [`Event`]s. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a bus holding at most `capacity` undelivered events (clamped to 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to current receivers; returns immediately.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates an independent receiver of subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
