//! # Message channels.
//!
//! A [`MessageChannel`] is a named conduit between producers and consumers. Two kinds exist:
//!
//! ```text
//! Queue (pollable):
//!   send() ──► [bounded FIFO] ──► receive()   (drained by the channel's dispatcher,
//!                                              or polled by scheduled subscriptions)
//!
//! Direct (synchronous):
//!   send() ──► deliver() ──► target.send()    (inline, on the sender's task;
//!                                              target errors propagate to the sender)
//! ```
//!
//! ## Rules
//! - A channel gets its name when it is first registered; renaming is a configuration error.
//! - Every channel has a process-unique [`ChannelId`] used as the dispatcher table key.
//! - Queue capacity is clamped to a minimum of 1.
//! - A queue channel owns both ends of its queue, so it never reports `Closed` while alive.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};

use crate::dispatch::deliver;
use crate::endpoints::{TargetRef, same_target};
use crate::error::{ConfigurationError, MessagingError};
use crate::messages::Message;

static CHANNEL_SEQ: AtomicU64 = AtomicU64::new(1);

const UNNAMED: &str = "<unnamed>";

/// Shared handle to a channel.
pub type ChannelRef = Arc<MessageChannel>;

/// Process-unique channel identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

/// How a message is spread over the subscribed targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// One target per message, round-robin with failover.
    #[default]
    PointToPoint,
    /// Every target gets a copy.
    Broadcast,
}

/// Channel flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    /// Bounded FIFO buffer, drained asynchronously.
    Queue {
        /// Maximum number of buffered messages.
        capacity: usize,
    },
    /// No buffer; `send` hands the message to the subscribed targets directly.
    Direct,
}

enum Inner {
    Queue {
        capacity: usize,
        tx: mpsc::Sender<Message>,
        rx: Mutex<mpsc::Receiver<Message>>,
    },
    Direct {
        targets: RwLock<Vec<TargetRef>>,
        cursor: AtomicUsize,
    },
}

/// Named conduit for messages.
pub struct MessageChannel {
    id: ChannelId,
    name: OnceLock<Arc<str>>,
    mode: DispatchMode,
    inner: Inner,
}

impl MessageChannel {
    /// Creates a queue channel holding at most `capacity` messages (min 1).
    pub fn queue(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self::with_inner(Inner::Queue {
            capacity,
            tx,
            rx: Mutex::new(rx),
        })
    }

    /// Creates a direct channel.
    pub fn direct() -> Self {
        Self::with_inner(Inner::Direct {
            targets: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        })
    }

    fn with_inner(inner: Inner) -> Self {
        Self {
            id: ChannelId(CHANNEL_SEQ.fetch_add(1, AtomicOrdering::Relaxed)),
            name: OnceLock::new(),
            mode: DispatchMode::default(),
            inner,
        }
    }

    /// Switches the channel to publish-subscribe delivery.
    pub fn broadcast(mut self) -> Self {
        self.mode = DispatchMode::Broadcast;
        self
    }

    /// Channel identity.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Registered name, or `"<unnamed>"` before registration.
    pub fn name(&self) -> &str {
        self.name.get().map(|n| n.as_ref()).unwrap_or(UNNAMED)
    }

    /// Channel flavor.
    pub fn kind(&self) -> ChannelKind {
        match &self.inner {
            Inner::Queue { capacity, .. } => ChannelKind::Queue {
                capacity: *capacity,
            },
            Inner::Direct { .. } => ChannelKind::Direct,
        }
    }

    /// Delivery mode.
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// True for direct channels.
    pub fn is_direct(&self) -> bool {
        matches!(self.inner, Inner::Direct { .. })
    }

    /// Number of buffered messages (always 0 for direct channels).
    pub fn len(&self) -> usize {
        match &self.inner {
            Inner::Queue { capacity, tx, .. } => capacity - tx.capacity(),
            Inner::Direct { .. } => 0,
        }
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assigns the registration name; idempotent for the same name.
    pub(crate) fn assign_name(&self, name: &str) -> Result<(), ConfigurationError> {
        let current = self.name.get_or_init(|| Arc::from(name));
        if current.as_ref() == name {
            Ok(())
        } else {
            Err(ConfigurationError::Renamed {
                current: current.to_string(),
                requested: name.to_string(),
            })
        }
    }

    /// Sends a message, waiting for queue capacity if needed.
    ///
    /// On a direct channel the message is delivered before this returns, and target errors
    /// are returned to the caller.
    pub async fn send(&self, message: Message) -> Result<(), MessagingError> {
        match &self.inner {
            Inner::Queue { tx, .. } => tx.send(message).await.map_err(|_| self.closed()),
            Inner::Direct { targets, cursor } => {
                let snapshot = targets.read().await.clone();
                deliver(&snapshot, self.mode, cursor, self.name(), message).await
            }
        }
    }

    /// Like [`send`](Self::send), but gives up waiting for queue capacity after `timeout`.
    ///
    /// `None` waits forever. The timeout does not apply to direct delivery.
    pub async fn send_timeout(
        &self,
        message: Message,
        timeout: Option<Duration>,
    ) -> Result<(), MessagingError> {
        match (&self.inner, timeout) {
            (Inner::Queue { tx, .. }, Some(dur)) => match tx.send_timeout(message, dur).await {
                Ok(()) => Ok(()),
                Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(MessagingError::SendTimeout {
                    channel: self.name().to_string(),
                    timeout: dur,
                }),
                Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(self.closed()),
            },
            _ => self.send(message).await,
        }
    }

    /// Sends without waiting for queue capacity.
    ///
    /// A full queue yields [`MessagingError::ChannelFull`]. Direct channels deliver inline,
    /// as [`send`](Self::send) does.
    pub async fn try_send(&self, message: Message) -> Result<(), MessagingError> {
        match &self.inner {
            Inner::Queue { tx, .. } => tx.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => MessagingError::ChannelFull {
                    channel: self.name().to_string(),
                },
                mpsc::error::TrySendError::Closed(_) => self.closed(),
            }),
            Inner::Direct { .. } => self.send(message).await,
        }
    }

    /// Waits for the next buffered message. Direct channels are not pollable and return `None`.
    pub async fn receive(&self) -> Option<Message> {
        match &self.inner {
            Inner::Queue { rx, .. } => rx.lock().await.recv().await,
            Inner::Direct { .. } => None,
        }
    }

    /// Like [`receive`](Self::receive), bounded by `timeout`.
    pub async fn receive_timeout(&self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.receive())
            .await
            .ok()
            .flatten()
    }

    /// Takes the next buffered message if one is immediately available.
    pub async fn try_receive(&self) -> Option<Message> {
        match &self.inner {
            Inner::Queue { rx, .. } => rx.lock().await.try_recv().ok(),
            Inner::Direct { .. } => None,
        }
    }

    /// Adds a target to a direct channel. Returns `false` on queue channels.
    pub(crate) async fn subscribe(&self, target: TargetRef) -> bool {
        match &self.inner {
            Inner::Direct { targets, .. } => {
                targets.write().await.push(target);
                true
            }
            Inner::Queue { .. } => false,
        }
    }

    /// Removes a target from a direct channel; `true` if it was subscribed.
    pub(crate) async fn unsubscribe(&self, target: &TargetRef) -> bool {
        match &self.inner {
            Inner::Direct { targets, .. } => {
                let mut targets = targets.write().await;
                let before = targets.len();
                targets.retain(|t| !same_target(t, target));
                targets.len() != before
            }
            Inner::Queue { .. } => false,
        }
    }

    /// Number of targets subscribed directly (direct channels only).
    pub async fn subscriber_count(&self) -> usize {
        match &self.inner {
            Inner::Direct { targets, .. } => targets.read().await.len(),
            Inner::Queue { .. } => 0,
        }
    }

    fn closed(&self) -> MessagingError {
        MessagingError::ChannelClosed {
            channel: self.name().to_string(),
        }
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("mode", &self.mode)
            .finish()
    }
}
