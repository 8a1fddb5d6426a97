//! # Subscriptions: which channel an endpoint listens to, and how.
//!
//! A [`Subscription`] names its channel either by handle or by registry name. Name-based
//! subscriptions are resolved when the endpoint is activated (and may auto-create the
//! channel). An optional [`Schedule`] turns the subscription into a poller.
//!
//! ```text
//! no schedule, queue channel   → served by the channel's drain loop (event-driven)
//! no schedule, direct channel  → target attached to the channel (inline delivery)
//! schedule,    queue channel   → dedicated poller: every `period`, up to
//!                                `max_messages_per_poll` messages
//! schedule,    direct channel  → configuration error (nothing to poll)
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::channels::ChannelRef;

/// Polling schedule for a subscription or a source adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// Delay between the end of one poll and the start of the next.
    pub period: Duration,
    /// Delay before the first poll.
    pub initial_delay: Duration,
    /// Upper bound of messages taken per poll (min 1).
    pub max_messages_per_poll: usize,
}

impl Schedule {
    /// Polls every `period`, one message per poll, starting immediately.
    pub fn fixed_delay(period: Duration) -> Self {
        Self {
            period,
            initial_delay: Duration::ZERO,
            max_messages_per_poll: 1,
        }
    }

    /// Returns a schedule with the given initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Returns a schedule taking up to `n` messages per poll (clamped to 1).
    pub fn with_max_messages_per_poll(mut self, n: usize) -> Self {
        self.max_messages_per_poll = n.max(1);
        self
    }
}

/// Channel reference held by a subscription.
#[derive(Clone)]
pub enum SubscriptionChannel {
    /// A concrete channel handle.
    Channel(ChannelRef),
    /// A channel registry name, resolved on activation.
    Name(Arc<str>),
}

/// Subscription metadata of an endpoint.
#[derive(Clone)]
pub struct Subscription {
    channel: SubscriptionChannel,
    schedule: Option<Schedule>,
}

impl Subscription {
    /// Subscribes to a concrete channel.
    pub fn to_channel(channel: ChannelRef) -> Self {
        Self {
            channel: SubscriptionChannel::Channel(channel),
            schedule: None,
        }
    }

    /// Subscribes to a channel by registry name.
    pub fn to_name(name: impl Into<Arc<str>>) -> Self {
        Self {
            channel: SubscriptionChannel::Name(name.into()),
            schedule: None,
        }
    }

    /// Polls the channel on `schedule` instead of being driven by its dispatcher loop.
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Channel reference.
    pub fn channel(&self) -> &SubscriptionChannel {
        &self.channel
    }

    /// Polling schedule, if any.
    pub fn schedule(&self) -> Option<Schedule> {
        self.schedule
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channel = match &self.channel {
            SubscriptionChannel::Channel(c) => c.name().to_string(),
            SubscriptionChannel::Name(n) => n.to_string(),
        };
        f.debug_struct("Subscription")
            .field("channel", &channel)
            .field("schedule", &self.schedule)
            .finish()
    }
}
