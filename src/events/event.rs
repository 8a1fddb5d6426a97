//! # Runtime events emitted by the message bus.
//!
//! [`EventKind`] groups events into:
//! - **Registry events**: channels and endpoints coming and going, activation, auto-creation
//! - **Lifecycle events**: bus and dispatcher start/stop, shutdown, grace outcome
//! - **Task events**: scheduled task attempts (starting, stopped, failed, timeout, backoff)
//! - **Delivery events**: messages dropped or failed during dispatch
//! - **Subscriber events**: overflow and panics of event subscribers
//!
//! Every [`Event`] carries a global monotonic `seq`; use it to restore order when events are
//! observed out of order.
//!
//! ## Example
//! ```rust
//! use msgbus::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ChannelRegistered).with_channel("orders");
//! assert_eq!(ev.channel.as_deref(), Some("orders"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Registry ===
    /// A channel was registered. Sets `channel`.
    ChannelRegistered,
    /// A channel was unregistered. Sets `channel`.
    ChannelUnregistered,
    /// A channel was created on demand for a subscription or output. Sets `channel`, `endpoint`.
    ChannelAutoCreated,
    /// An endpoint was registered. Sets `endpoint`.
    EndpointRegistered,
    /// An endpoint was unregistered. Sets `endpoint`.
    EndpointUnregistered,
    /// An endpoint subscription was activated. Sets `endpoint`, `channel`.
    EndpointActivated,
    /// A source adapter was registered. Sets `task` (adapter name).
    SourceAdapterRegistered,

    // === Lifecycle ===
    /// The bus started.
    BusStarted,
    /// The bus stopped.
    BusStopped,
    /// An OS termination signal was observed.
    ShutdownRequested,
    /// A dispatcher started. Sets `channel`.
    DispatcherStarted,
    /// A dispatcher stopped. Sets `channel`.
    DispatcherStopped,
    /// All scheduled tasks stopped within the grace period.
    AllStoppedWithin,
    /// The grace period elapsed with tasks still running. Sets `reason` (stuck tasks).
    GraceExceeded,

    // === Scheduled tasks ===
    /// A task attempt is starting. Sets `task`, `attempt`.
    TaskStarting,
    /// A task attempt finished (success or graceful cancellation). Sets `task`, `attempt`.
    TaskStopped,
    /// A task attempt failed. Sets `task`, `attempt`, `reason`.
    TaskFailed,
    /// A task attempt exceeded its timeout. Sets `task`, `attempt`, `timeout_ms`.
    TimeoutHit,
    /// A retry was scheduled after a failure. Sets `task`, `attempt`, `delay_ms`, `reason`.
    BackoffScheduled,
    /// A task stopped for good after a fatal error. Sets `task`, `attempt`, `reason`.
    TaskDead,

    // === Delivery ===
    /// A message reached a channel with no subscribed targets. Sets `channel`, `message_id`.
    MessageDropped,
    /// Every target failed to accept a message. Sets `channel`, `message_id`, `reason`.
    MessageFailed,

    // === Subscribers ===
    /// A subscriber's queue was full or closed and an event was dropped. Sets `task`, `reason`.
    SubscriberOverflow,
    /// A subscriber panicked. Sets `task`, `reason`.
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Classification.
    pub kind: EventKind,
    /// Channel name, if applicable.
    pub channel: Option<Arc<str>>,
    /// Endpoint name, if applicable.
    pub endpoint: Option<Arc<str>>,
    /// Task or subscriber name, if applicable.
    pub task: Option<Arc<str>>,
    /// Id of the message concerned.
    pub message_id: Option<u64>,
    /// Attempt number (1-based).
    pub attempt: Option<u32>,
    /// Backoff delay in milliseconds.
    pub delay_ms: Option<u32>,
    /// Attempt timeout in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event with the current time and the next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            channel: None,
            endpoint: None,
            task: None,
            message_id: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            reason: None,
        }
    }

    /// Attaches a channel name.
    #[inline]
    pub fn with_channel(mut self, channel: impl Into<Arc<str>>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Attaches an endpoint name.
    #[inline]
    pub fn with_endpoint(mut self, endpoint: impl Into<Arc<str>>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Attaches a task (or subscriber) name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a message id.
    #[inline]
    pub fn with_message(mut self, id: u64) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Attaches an attempt number.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(millis(d));
        self
    }

    /// Attaches an attempt timeout (stored as milliseconds, saturating).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(millis(d));
        self
    }

    /// Attaches a reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Subscriber overflow event.
    pub(crate) fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(reason)
    }

    /// Subscriber panic event.
    pub(crate) fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }
}

fn millis(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
