//! # Dispatcher: one per channel.
//!
//! ```text
//!               ┌── drain loop (Once task) ── receive() ─► deliver(unscheduled targets)
//! queue channel ┤
//!               └── poller per scheduled target (FixedDelay task)
//!                        every period: try_receive() × max_messages_per_poll ─► target
//! ```
//!
//! ## Rules
//! - Loops and pollers run on the bus [`TaskScheduler`] and stop with `stop()`; a
//!   cancelled loop takes no further message.
//! - Targets added while running get their loop or poller immediately.
//! - Every delivery holds a permit of the bus-wide pool, when one is configured.
//! - No target: the message is dropped (warn + `MessageDropped`).
//! - All targets failed: `MessageFailed`, then the scheduler's error handler.
//! - Failures on the error channel, or of error messages, are only logged.
//! - Direct channels deliver inline; their dispatcher never polls.
//! - The drain loop and pollers of one channel share its receiver; while the drain loop
//!   waits for a message, pollers wait for the receiver.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::ERROR_CHANNEL_NAME;
use crate::channels::ChannelRef;
use crate::endpoints::{Schedule, TargetRef, same_target};
use crate::error::TaskError;
use crate::events::{Event, EventBus, EventKind};
use crate::messages::Message;
use crate::scheduling::{Task, TaskHandle, TaskScheduler, TaskSpec};

use super::deliver;

/// State shared between the dispatcher and its scheduled tasks.
struct Shared {
    channel: ChannelRef,
    events: EventBus,
    pool: Option<Arc<Semaphore>>,
    scheduler: Weak<TaskScheduler>,
    targets: RwLock<Vec<TargetRef>>,
    cursor: AtomicUsize,
}

impl Shared {
    /// Delivers one message to `targets` with a pool permit held.
    async fn dispatch(&self, targets: &[TargetRef], message: Message) {
        let _permit = match &self.pool {
            Some(pool) => match Arc::clone(pool).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_closed) => return,
            },
            None => None,
        };

        let channel = self.channel.name();
        if targets.is_empty() {
            warn!(channel, message_id = message.id(), "no subscribers, dropping message");
            self.events.publish(
                Event::new(EventKind::MessageDropped)
                    .with_channel(channel)
                    .with_message(message.id()),
            );
            return;
        }

        let mode = self.channel.mode();
        let Err(error) = deliver(targets, mode, &self.cursor, channel, message.clone()).await
        else {
            return;
        };

        self.events.publish(
            Event::new(EventKind::MessageFailed)
                .with_channel(channel)
                .with_message(message.id())
                .with_reason(error.to_string()),
        );
        // A failed error message must not produce another one.
        if channel == ERROR_CHANNEL_NAME || message.is_error() {
            warn!(channel, message_id = message.id(), error = %error, "error message not handled");
            return;
        }
        let handler = match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.error_handler().await,
            None => None,
        };
        match handler {
            Some(handler) => {
                if let Err(e) = handler.handle(error, Some(&message)).await {
                    warn!(channel, message_id = message.id(), error = %e, "delivery failure not handled");
                }
            }
            None => {
                warn!(channel, message_id = message.id(), error = %error, "delivery failed")
            }
        }
    }
}

/// Event-driven loop delivering to the unscheduled targets.
struct DrainLoop {
    name: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl Task for DrainLoop {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        loop {
            let message = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(TaskError::Canceled),
                m = self.shared.channel.receive() => m,
            };
            let Some(message) = message else {
                return Ok(());
            };
            let targets = self.shared.targets.read().await.clone();
            self.shared.dispatch(&targets, message).await;
        }
    }
}

/// One poll of a scheduled target.
struct Poller {
    name: String,
    shared: Arc<Shared>,
    target: TargetRef,
    max_messages: usize,
}

#[async_trait]
impl Task for Poller {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        let target = std::slice::from_ref(&self.target);
        for _ in 0..self.max_messages {
            let message = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(TaskError::Canceled),
                m = self.shared.channel.try_receive() => m,
            };
            let Some(message) = message else {
                break;
            };
            self.shared.dispatch(target, message).await;
        }
        Ok(())
    }
}

struct Scheduled {
    target: TargetRef,
    schedule: Schedule,
    poller: Option<TaskHandle>,
}

#[derive(Default)]
struct State {
    scheduled: Vec<Scheduled>,
    drain: Option<TaskHandle>,
    polls: usize,
}

/// Moves messages from one channel to its subscribed targets.
pub struct Dispatcher {
    shared: Arc<Shared>,
    scheduler: Arc<TaskScheduler>,
    state: Mutex<State>,
    running: AtomicBool,
}

impl Dispatcher {
    /// Creates a stopped dispatcher for `channel`.
    pub fn new(
        channel: ChannelRef,
        scheduler: Arc<TaskScheduler>,
        events: EventBus,
        pool: Option<Arc<Semaphore>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                channel,
                events,
                pool,
                scheduler: Arc::downgrade(&scheduler),
                targets: RwLock::new(Vec::new()),
                cursor: AtomicUsize::new(0),
            }),
            scheduler,
            state: Mutex::new(State::default()),
            running: AtomicBool::new(false),
        }
    }

    /// The dispatched channel.
    pub fn channel(&self) -> &ChannelRef {
        &self.shared.channel
    }

    /// True between `start()` and `stop()`.
    pub fn is_running(&self) -> bool {
        self.running.load(AtomicOrdering::Acquire)
    }

    /// Number of subscribed targets (drained and polled).
    pub async fn target_count(&self) -> usize {
        let state = self.state.lock().await;
        self.shared.targets.read().await.len() + state.scheduled.len()
    }

    /// Subscribes `target`; with a schedule it gets its own poller.
    pub async fn add_target(&self, target: TargetRef, schedule: Option<Schedule>) {
        let mut state = self.state.lock().await;
        match schedule {
            None => {
                self.shared.targets.write().await.push(target);
                if self.is_running() {
                    self.ensure_drain(&mut state).await;
                }
            }
            Some(schedule) => {
                let poller = if self.is_running() {
                    Some(self.spawn_poller(&mut state, &target, schedule).await)
                } else {
                    None
                };
                state.scheduled.push(Scheduled {
                    target,
                    schedule,
                    poller,
                });
            }
        }
    }

    /// Unsubscribes `target`; `true` if it was subscribed.
    pub async fn remove_target(&self, target: &TargetRef) -> bool {
        let mut state = self.state.lock().await;
        let mut removed = false;

        {
            let mut targets = self.shared.targets.write().await;
            let before = targets.len();
            targets.retain(|t| !same_target(t, target));
            removed |= targets.len() != before;
        }

        state.scheduled.retain(|s| {
            if !same_target(&s.target, target) {
                return true;
            }
            if let Some(poller) = &s.poller {
                poller.cancel();
            }
            removed = true;
            false
        });
        removed
    }

    /// Starts the drain loop and pollers. No-op if running.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if self.running.swap(true, AtomicOrdering::AcqRel) {
            return;
        }

        if !self.shared.targets.read().await.is_empty() {
            self.ensure_drain(&mut state).await;
        }
        let pending: Vec<(usize, TargetRef, Schedule)> = state
            .scheduled
            .iter()
            .enumerate()
            .map(|(i, s)| (i, Arc::clone(&s.target), s.schedule))
            .collect();
        for (i, target, schedule) in pending {
            let handle = self.spawn_poller(&mut state, &target, schedule).await;
            state.scheduled[i].poller = Some(handle);
        }

        debug!(channel = self.shared.channel.name(), "dispatcher started");
        self.shared
            .events
            .publish(Event::new(EventKind::DispatcherStarted).with_channel(self.shared.channel.name()));
    }

    /// Cancels the drain loop and pollers. No-op if stopped.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if !self.running.swap(false, AtomicOrdering::AcqRel) {
            return;
        }
        if let Some(drain) = state.drain.take() {
            drain.cancel();
        }
        for s in &mut state.scheduled {
            if let Some(poller) = s.poller.take() {
                poller.cancel();
            }
        }

        debug!(channel = self.shared.channel.name(), "dispatcher stopped");
        self.shared
            .events
            .publish(Event::new(EventKind::DispatcherStopped).with_channel(self.shared.channel.name()));
    }

    async fn ensure_drain(&self, state: &mut State) {
        if state.drain.is_some() || self.shared.channel.is_direct() {
            return;
        }
        let task = Arc::new(DrainLoop {
            name: format!("dispatcher:{}", self.shared.channel.name()),
            shared: Arc::clone(&self.shared),
        });
        // Runs until cancelled; the bus-wide attempt timeout must not apply.
        let spec = TaskSpec::once(task).with_timeout(Duration::ZERO);
        state.drain = Some(self.scheduler.schedule(spec).await);
    }

    async fn spawn_poller(
        &self,
        state: &mut State,
        target: &TargetRef,
        schedule: Schedule,
    ) -> TaskHandle {
        state.polls += 1;
        let task = Arc::new(Poller {
            name: format!("poller:{}:{}", self.shared.channel.name(), state.polls),
            shared: Arc::clone(&self.shared),
            target: Arc::clone(target),
            max_messages: schedule.max_messages_per_poll.max(1),
        });
        let spec = TaskSpec::fixed_delay(task, schedule.period)
            .with_initial_delay(schedule.initial_delay);
        self.scheduler.schedule(spec).await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channel", &self.shared.channel.name())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::channels::MessageChannel;
    use crate::endpoints::TargetFn;
    use crate::error::MessagingError;

    fn recorder(seen: Arc<Mutex<Vec<u64>>>) -> TargetRef {
        TargetFn::arc(move |msg: Message| {
            let seen = seen.clone();
            async move {
                seen.lock().await.push(msg.id());
                Ok::<_, MessagingError>(())
            }
        })
    }

    async fn running_scheduler(events: &EventBus) -> Arc<TaskScheduler> {
        let scheduler = Arc::new(TaskScheduler::new(events.clone()));
        scheduler.start().await;
        scheduler
    }

    async fn wait_for(seen: &Arc<Mutex<Vec<u64>>>, n: usize) {
        timeout(Duration::from_secs(2), async {
            while seen.lock().await.len() < n {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages not delivered in time");
    }

    #[tokio::test]
    async fn drain_loop_delivers_in_order() {
        let events = EventBus::new(64);
        let scheduler = running_scheduler(&events).await;
        let channel: ChannelRef = Arc::new(MessageChannel::queue(8));
        let dispatcher = Dispatcher::new(channel.clone(), scheduler.clone(), events, None);

        let seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.add_target(recorder(seen.clone()), None).await;
        dispatcher.start().await;

        let a = Message::new(1);
        let b = Message::new(2);
        let ids = vec![a.id(), b.id()];
        channel.send(a).await.unwrap();
        channel.send(b).await.unwrap();

        wait_for(&seen, 2).await;
        assert_eq!(*seen.lock().await, ids);

        dispatcher.stop().await;
        assert!(!dispatcher.is_running());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn target_added_while_running_starts_draining() {
        let events = EventBus::new(64);
        let scheduler = running_scheduler(&events).await;
        let channel: ChannelRef = Arc::new(MessageChannel::queue(8));
        let dispatcher = Dispatcher::new(channel.clone(), scheduler.clone(), events, None);
        dispatcher.start().await;

        channel.send(Message::new(1)).await.unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.add_target(recorder(seen.clone()), None).await;

        wait_for(&seen, 1).await;
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn scheduled_target_is_polled() {
        let events = EventBus::new(256);
        let scheduler = running_scheduler(&events).await;
        let channel: ChannelRef = Arc::new(MessageChannel::queue(8));
        let dispatcher = Dispatcher::new(channel.clone(), scheduler.clone(), events, None);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let schedule = Schedule::fixed_delay(Duration::from_millis(5)).with_max_messages_per_poll(2);
        dispatcher
            .add_target(recorder(seen.clone()), Some(schedule))
            .await;
        dispatcher.start().await;

        for n in 0..3 {
            channel.send(Message::new(n)).await.unwrap();
        }
        wait_for(&seen, 3).await;
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn removed_target_no_longer_receives() {
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let scheduler = running_scheduler(&events).await;
        let channel: ChannelRef = Arc::new(MessageChannel::queue(8));
        let dispatcher = Dispatcher::new(channel.clone(), scheduler.clone(), events, None);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let target = recorder(seen.clone());
        dispatcher.add_target(target.clone(), None).await;
        dispatcher.start().await;
        assert!(dispatcher.remove_target(&target).await);
        assert!(!dispatcher.remove_target(&target).await);

        let msg = Message::new(1);
        let id = msg.id();
        channel.send(msg).await.unwrap();

        let dropped = timeout(Duration::from_secs(2), async {
            loop {
                let ev = rx.recv().await.unwrap();
                if ev.kind == EventKind::MessageDropped {
                    return ev;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(dropped.message_id, Some(id));
        assert!(seen.lock().await.is_empty());
        scheduler.stop().await.unwrap();
    }
}
