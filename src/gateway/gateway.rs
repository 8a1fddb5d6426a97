use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::bus::MessageBus;
use crate::channels::{ChannelRef, MessageChannel};
use crate::endpoints::{Target, TargetRef};
use crate::error::{ConfigurationError, MessagingError};
use crate::messages::Message;

type ReplySender = oneshot::Sender<Result<Message, MessagingError>>;

#[derive(Default)]
struct Pending {
    waiting: Mutex<HashMap<u64, ReplySender>>,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, ReplySender>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: u64, tx: ReplySender) {
        self.lock().insert(id, tx);
    }

    fn take(&self, id: u64) -> Option<ReplySender> {
        self.lock().remove(&id)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Target on the reply channel: hands replies to the request waiting for them.
struct ReplyRouter {
    pending: Arc<Pending>,
}

#[async_trait]
impl Target for ReplyRouter {
    async fn send(&self, message: Message) -> Result<(), MessagingError> {
        let waiting = message.correlation_id().and_then(|id| self.pending.take(id));
        match waiting {
            Some(tx) => {
                let _ = tx.send(Ok(message));
            }
            None => debug!(
                message_id = message.id(),
                correlation_id = ?message.correlation_id(),
                "reply without a waiting request"
            ),
        }
        Ok(())
    }
}

/// Client-side entry point for request/reply over a bus channel.
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use msgbus::{BusConfig, Gateway, MessageBus, MessageChannel};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = MessageBus::new(BusConfig::default());
/// bus.register_channel("math", Arc::new(MessageChannel::queue(64))).await?;
/// let gateway = Gateway::new(&bus, "mathService", "math")
///     .await?
///     .with_reply_timeout(Duration::from_secs(2));
///
/// let reply = gateway.send_and_receive(21).await?;
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    name: Arc<str>,
    request: ChannelRef,
    reply_channel: Arc<str>,
    pending: Arc<Pending>,
    reply_timeout: Duration,
    send_timeout: Option<Duration>,
}

impl Gateway {
    /// Binds a gateway named `name` to `request_channel` and registers its reply channel
    /// `<name>.replies` on `bus`.
    pub async fn new(
        bus: &MessageBus,
        name: &str,
        request_channel: &str,
    ) -> Result<Self, ConfigurationError> {
        let request = bus.lookup_channel(request_channel).await.ok_or_else(|| {
            ConfigurationError::UnknownChannel {
                channel: request_channel.to_string(),
            }
        })?;

        let pending = Arc::new(Pending::default());
        let replies: ChannelRef = Arc::new(MessageChannel::direct());
        let router: TargetRef = Arc::new(ReplyRouter {
            pending: Arc::clone(&pending),
        });
        replies.subscribe(router).await;

        let reply_channel: Arc<str> = Arc::from(format!("{name}.replies"));
        bus.register_channel(&reply_channel, replies).await?;

        Ok(Self {
            name: Arc::from(name),
            request,
            reply_channel,
            pending,
            reply_timeout: Duration::from_secs(30),
            send_timeout: bus.config().send_timeout(),
        })
    }

    /// How long a request waits for its reply (default 30s).
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Gateway name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the reply channel.
    pub fn reply_channel(&self) -> &str {
        &self.reply_channel
    }

    /// Number of requests still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Sends `payload` without expecting a reply.
    pub async fn send(&self, payload: impl Into<Value>) -> Result<(), MessagingError> {
        self.request
            .send_timeout(Message::new(payload), self.send_timeout)
            .await
    }

    /// Sends `payload` and waits for the reply.
    pub async fn send_and_receive(
        &self,
        payload: impl Into<Value>,
    ) -> Result<Message, MessagingError> {
        self.request(payload).await
    }

    /// Sends `payload` in the background and returns a future of the reply.
    ///
    /// The reply timeout counts from this call. Dropping the future forgets the request.
    /// Must be called within a tokio runtime.
    pub fn request(&self, payload: impl Into<Value>) -> ReplyFuture {
        let message = Message::new(payload)
            .with_return_address(Arc::clone(&self.reply_channel))
            .with_error_channel(Arc::clone(&self.reply_channel));
        let id = message.id();
        let deadline = Instant::now() + self.reply_timeout;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let request = Arc::clone(&self.request);
        let pending = Arc::clone(&self.pending);
        let send_timeout = self.send_timeout;
        tokio::spawn(async move {
            if let Err(e) = request.send_timeout(message, send_timeout).await {
                if let Some(tx) = pending.take(id) {
                    let _ = tx.send(Err(e));
                }
            }
        });

        let reply_timeout = self.reply_timeout;
        let reply_channel = Arc::clone(&self.reply_channel);
        let inner = async move {
            match timeout_at(deadline, rx).await {
                Ok(Ok(Ok(reply))) => match reply.as_remote_error() {
                    Some(remote) => Err(remote),
                    None => Ok(reply),
                },
                Ok(Ok(Err(e))) => Err(e),
                Ok(Err(_dropped)) => Err(MessagingError::ChannelClosed {
                    channel: reply_channel.to_string(),
                }),
                Err(_elapsed) => Err(MessagingError::ReplyTimeout {
                    timeout: reply_timeout,
                }),
            }
        };

        ReplyFuture {
            id,
            pending: Arc::clone(&self.pending),
            inner: Box::pin(inner),
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("name", &self.name)
            .field("request", &self.request.name())
            .field("reply_channel", &self.reply_channel)
            .field("reply_timeout", &self.reply_timeout)
            .finish()
    }
}

/// Reply to a [`Gateway::request`].
#[must_use = "futures do nothing unless awaited"]
pub struct ReplyFuture {
    id: u64,
    pending: Arc<Pending>,
    inner: Pin<Box<dyn Future<Output = Result<Message, MessagingError>> + Send>>,
}

impl ReplyFuture {
    /// Id of the request message.
    pub fn request_id(&self) -> u64 {
        self.id
    }
}

impl Future for ReplyFuture {
    type Output = Result<Message, MessagingError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl Drop for ReplyFuture {
    fn drop(&mut self) {
        self.pending.take(self.id);
    }
}
