//! # Logging subscriber.
//!
//! [`LogWriter`] forwards bus events to [`tracing`]: failures at `warn`, lifecycle and
//! registry changes at `info`, per-attempt chatter at `debug`.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use msgbus::{BusConfig, LogWriter, MessageBus};
//!
//! # async fn demo() {
//! let bus = MessageBus::builder(BusConfig::default())
//!     .with_subscribers(vec![Arc::new(LogWriter)])
//!     .build();
//! # }
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Writes every event through `tracing`. Enabled via the `logging` feature.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let channel = e.channel.as_deref().unwrap_or("-");
        let endpoint = e.endpoint.as_deref().unwrap_or("-");
        let task = e.task.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");

        match e.kind {
            EventKind::ChannelRegistered => info!(seq = e.seq, channel, "channel registered"),
            EventKind::ChannelUnregistered => info!(seq = e.seq, channel, "channel unregistered"),
            EventKind::ChannelAutoCreated => {
                info!(seq = e.seq, channel, endpoint, "channel auto-created")
            }
            EventKind::EndpointRegistered => info!(seq = e.seq, endpoint, "endpoint registered"),
            EventKind::EndpointUnregistered => {
                info!(seq = e.seq, endpoint, "endpoint unregistered")
            }
            EventKind::EndpointActivated => {
                info!(seq = e.seq, endpoint, channel, "endpoint activated")
            }
            EventKind::SourceAdapterRegistered => {
                info!(seq = e.seq, adapter = task, "source adapter registered")
            }
            EventKind::BusStarted => info!(seq = e.seq, "bus started"),
            EventKind::BusStopped => info!(seq = e.seq, "bus stopped"),
            EventKind::ShutdownRequested => info!(seq = e.seq, "shutdown requested"),
            EventKind::DispatcherStarted => debug!(seq = e.seq, channel, "dispatcher started"),
            EventKind::DispatcherStopped => debug!(seq = e.seq, channel, "dispatcher stopped"),
            EventKind::AllStoppedWithin => info!(seq = e.seq, "all tasks stopped within grace"),
            EventKind::GraceExceeded => warn!(seq = e.seq, stuck = reason, "grace exceeded"),
            EventKind::TaskStarting => debug!(seq = e.seq, task, attempt = ?e.attempt, "starting"),
            EventKind::TaskStopped => debug!(seq = e.seq, task, attempt = ?e.attempt, "stopped"),
            EventKind::TaskFailed => {
                warn!(seq = e.seq, task, attempt = ?e.attempt, reason, "task failed")
            }
            EventKind::TimeoutHit => {
                warn!(seq = e.seq, task, timeout_ms = ?e.timeout_ms, "task timed out")
            }
            EventKind::BackoffScheduled => {
                debug!(seq = e.seq, task, delay_ms = ?e.delay_ms, attempt = ?e.attempt, reason, "backoff")
            }
            EventKind::TaskDead => warn!(seq = e.seq, task, reason, "task dead"),
            EventKind::MessageDropped => {
                warn!(seq = e.seq, channel, message_id = ?e.message_id, "message dropped: no subscribers")
            }
            EventKind::MessageFailed => {
                warn!(seq = e.seq, channel, message_id = ?e.message_id, reason, "message delivery failed")
            }
            EventKind::SubscriberOverflow => {
                warn!(seq = e.seq, subscriber = task, reason, "subscriber overflow")
            }
            EventKind::SubscriberPanicked => {
                warn!(seq = e.seq, subscriber = task, reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
