//! # Delivery of one message to a set of targets.
//!
//! Shared by direct channels (inline, on the sender's task) and by dispatchers
//! (on scheduler tasks).
//!
//! ## Rules
//! - `PointToPoint`: exactly one target receives the message. The start position rotates
//!   (round-robin); a failing target fails over to the next one. The last error is returned
//!   when every target failed.
//! - `Broadcast`: every target receives a clone. All targets are attempted; the first error
//!   is returned.
//! - No targets: [`MessagingError::NoTargets`].

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use tracing::debug;

use crate::channels::DispatchMode;
use crate::endpoints::TargetRef;
use crate::error::MessagingError;
use crate::messages::Message;

/// Delivers `message` to `targets` according to `mode`.
pub(crate) async fn deliver(
    targets: &[TargetRef],
    mode: DispatchMode,
    cursor: &AtomicUsize,
    channel: &str,
    message: Message,
) -> Result<(), MessagingError> {
    if targets.is_empty() {
        return Err(MessagingError::NoTargets {
            channel: channel.to_string(),
        });
    }

    match mode {
        DispatchMode::PointToPoint => {
            let n = targets.len();
            let start = cursor.fetch_add(1, AtomicOrdering::Relaxed) % n;
            let mut last_err = None;

            for offset in 0..n {
                let target = &targets[(start + offset) % n];
                match target.send(message.clone()).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        debug!(channel, message_id = message.id(), error = %e, "target failed, failing over");
                        last_err = Some(e);
                    }
                }
            }
            Err(last_err.unwrap_or_else(|| MessagingError::NoTargets {
                channel: channel.to_string(),
            }))
        }
        DispatchMode::Broadcast => {
            let mut first_err = None;
            for target in targets {
                if let Err(e) = target.send(message.clone()).await {
                    debug!(channel, message_id = message.id(), error = %e, "broadcast target failed");
                    first_err.get_or_insert(e);
                }
            }
            match first_err {
                None => Ok(()),
                Some(e) => Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Mutex;

    use super::*;
    use crate::endpoints::TargetFn;

    fn recorder(tag: &'static str, log: Arc<Mutex<Vec<&'static str>>>, fail: bool) -> TargetRef {
        TargetFn::arc(move |_msg: Message| {
            let log = log.clone();
            async move {
                log.lock().await.push(tag);
                if fail {
                    Err(MessagingError::handler(tag))
                } else {
                    Ok(())
                }
            }
        })
    }

    #[tokio::test]
    async fn point_to_point_rotates_between_targets() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let targets = vec![
            recorder("a", log.clone(), false),
            recorder("b", log.clone(), false),
        ];
        let cursor = AtomicUsize::new(0);

        for _ in 0..4 {
            deliver(&targets, DispatchMode::PointToPoint, &cursor, "ch", Message::new(1))
                .await
                .unwrap();
        }
        assert_eq!(*log.lock().await, vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn point_to_point_fails_over() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let targets = vec![
            recorder("broken", log.clone(), true),
            recorder("healthy", log.clone(), false),
        ];
        let cursor = AtomicUsize::new(0);

        deliver(&targets, DispatchMode::PointToPoint, &cursor, "ch", Message::new(1))
            .await
            .unwrap();
        assert_eq!(*log.lock().await, vec!["broken", "healthy"]);
    }

    #[tokio::test]
    async fn point_to_point_returns_last_error_when_all_fail() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let targets = vec![recorder("x", log.clone(), true), recorder("y", log.clone(), true)];
        let cursor = AtomicUsize::new(0);

        let err = deliver(&targets, DispatchMode::PointToPoint, &cursor, "ch", Message::new(1))
            .await
            .unwrap_err();
        assert_eq!(err, MessagingError::handler("y"));
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_despite_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let targets = vec![
            recorder("a", log.clone(), true),
            recorder("b", log.clone(), false),
            recorder("c", log.clone(), false),
        ];
        let cursor = AtomicUsize::new(0);

        let err = deliver(&targets, DispatchMode::Broadcast, &cursor, "ch", Message::new(1))
            .await
            .unwrap_err();
        assert_eq!(err, MessagingError::handler("a"));
        assert_eq!(*log.lock().await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn no_targets_is_an_error() {
        let cursor = AtomicUsize::new(0);
        let err = deliver(&[], DispatchMode::Broadcast, &cursor, "empty", Message::new(1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MessagingError::NoTargets {
                channel: "empty".into()
            }
        );
    }
}
