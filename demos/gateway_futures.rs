//! # Example: gateway_futures
//!
//! A "multiply by two" service behind a request channel, called through a [`Gateway`] that
//! returns reply futures.
//!
//! Demonstrates how to:
//! - Register a handler endpoint with a [`ConcurrencyPolicy`].
//! - Fire many requests at once with [`Gateway::request`] and await the replies concurrently.
//! - Tell apart successful replies, remote failures and reply timeouts.
//!
//! The service rejects numbers below 100 and is slow for multiples of 7.
//!
//! ## Flow
//! ```text
//! gateway.request(n) ──► "numbers" (queue) ──► Dispatcher ──► "doubler" endpoint
//!        ▲                                                          │
//!        │        ok  ──► reply (correlated) ───────────────────────┤
//!        └── "gw.replies" ◄─ error message (PublishingErrorHandler) ┘
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example gateway_futures --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use msgbus::{
    BusConfig, ConcurrencyPolicy, Gateway, HandlerFn, LogWriter, Message, MessageBus,
    MessageChannel, MessagingError, Subscribe, Subscription,
};

const REQUESTS: usize = 100;
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
    let bus = MessageBus::with_subscribers(BusConfig::default(), subs);
    bus.register_channel("numbers", Arc::new(MessageChannel::queue(REQUESTS)))
        .await?;

    let doubler = HandlerFn::arc(|msg: Message| async move {
        let n = msg.payload().as_i64().unwrap_or_default();
        if n < 100 {
            return Err(MessagingError::handler(format!("{n} is below 100")));
        }
        if n % 7 == 0 {
            tokio::time::sleep(REPLY_TIMEOUT * 2).await;
        }
        Ok(Some(msg.reply(n * 2)))
    });
    bus.register_handler_with(
        "doubler",
        doubler,
        Subscription::to_name("numbers"),
        ConcurrencyPolicy::new(32, REQUESTS),
    )
    .await?;
    bus.start().await?;

    let gateway = Gateway::new(&bus, "gw", "numbers")
        .await?
        .with_reply_timeout(REPLY_TIMEOUT);

    let mut rng = rand::rng();
    let mut replies = JoinSet::new();
    for _ in 0..REQUESTS {
        let n: i64 = rng.random_range(0..200);
        let reply = gateway.request(n);
        replies.spawn(async move { (n, reply.await) });
    }

    let (mut ok, mut rejected, mut timed_out) = (0usize, 0usize, 0usize);
    while let Some(joined) = replies.join_next().await {
        let (n, outcome) = joined?;
        match outcome {
            Ok(reply) => {
                ok += 1;
                println!("{n:>3} * 2 = {}", reply.payload());
            }
            Err(MessagingError::ReplyTimeout { timeout }) => {
                timed_out += 1;
                println!("{n:>3}: no reply within {timeout:?}");
            }
            Err(e) => {
                rejected += 1;
                println!("{n:>3}: {e}");
            }
        }
    }
    println!("done: {ok} ok, {rejected} rejected, {timed_out} timed out");

    bus.stop().await?;
    Ok(())
}
