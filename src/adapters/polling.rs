//! # Polling source adapter.
//!
//! Every `period` the adapter asks its [`MessageSource`] for up to `max_messages_per_poll`
//! messages and sends each one to the output channel. A source or send error fails the
//! poll; the scheduler reports it and backs off before the next attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::channels::ChannelRef;
use crate::endpoints::Schedule;
use crate::error::TaskError;
use crate::scheduling::{Task, TaskSpec};

use super::source::{MessageSource, SourceAdapter};

/// Polls a [`MessageSource`] on a [`Schedule`] into an output channel.
pub struct PollingSourceAdapter {
    source: Arc<dyn MessageSource>,
    output: ChannelRef,
    schedule: Schedule,
    send_timeout: Option<Duration>,
}

impl PollingSourceAdapter {
    /// Creates an adapter forwarding `source` to `output`.
    pub fn new(source: Arc<dyn MessageSource>, output: ChannelRef, schedule: Schedule) -> Self {
        Self {
            source,
            output,
            schedule,
            send_timeout: None,
        }
    }

    /// Bounds the wait for space in the output channel.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout).filter(|d| !d.is_zero());
        self
    }

    /// The polling schedule.
    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// One poll: forwards up to `max_messages_per_poll` messages; returns how many.
    pub async fn poll(&self) -> Result<usize, TaskError> {
        let mut forwarded = 0;
        for _ in 0..self.schedule.max_messages_per_poll.max(1) {
            let Some(message) = self.source.receive().await? else {
                break;
            };
            self.output.send_timeout(message, self.send_timeout).await?;
            forwarded += 1;
        }
        trace!(channel = self.output.name(), forwarded, "poll complete");
        Ok(forwarded)
    }
}

impl SourceAdapter for PollingSourceAdapter {
    fn name(&self) -> &str {
        "polling-source-adapter"
    }

    fn task(self: Arc<Self>, name: &str) -> Option<TaskSpec> {
        let schedule = self.schedule;
        let task = Arc::new(PollTask {
            name: name.to_string(),
            adapter: self,
        });
        Some(
            TaskSpec::fixed_delay(task, schedule.period).with_initial_delay(schedule.initial_delay),
        )
    }
}

struct PollTask {
    name: String,
    adapter: Arc<PollingSourceAdapter>,
}

#[async_trait]
impl Task for PollTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        tokio::select! {
            _ = ctx.cancelled() => Err(TaskError::Canceled),
            res = self.adapter.poll() => res.map(|_| ()),
        }
    }
}
