//! Error types used by the message bus.
//!
//! - [`MessagingError`]: a message could not be sent, delivered or handled.
//! - [`ConfigurationError`]: channels, endpoints or subscriptions are wired incorrectly.
//! - [`RuntimeError`]: a lifecycle transition (start/stop) of the bus failed.
//! - [`TaskError`]: a scheduled task (dispatcher loop, poller, source adapter) failed an attempt.
//!
//! Every enum provides `as_label` which returns a short stable snake_case label for logs
//! and error message payloads.

use std::time::Duration;

use thiserror::Error;

/// # Errors raised while sending, delivering or handling messages.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// A queue channel had no free capacity and the sender did not wait.
    #[error("channel '{channel}' is full")]
    ChannelFull {
        /// Name of the channel.
        channel: String,
    },

    /// The channel can no longer accept or yield messages.
    #[error("channel '{channel}' is closed")]
    ChannelClosed {
        /// Name of the channel.
        channel: String,
    },

    /// Waiting for queue capacity exceeded the send timeout.
    #[error("send to channel '{channel}' timed out after {timeout:?}")]
    SendTimeout {
        /// Name of the channel.
        channel: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// A message reached a channel with nobody subscribed to it.
    #[error("no targets subscribed to channel '{channel}'")]
    NoTargets {
        /// Name of the channel.
        channel: String,
    },

    /// An endpoint refused the message (its concurrency backlog is full).
    #[error("endpoint '{endpoint}' rejected message: {reason}")]
    Rejected {
        /// Name of the endpoint.
        endpoint: String,
        /// Why the message was refused.
        reason: String,
    },

    /// A handler or target failed while processing a message.
    #[error("handler failed: {error}")]
    Handler {
        /// The underlying error message.
        error: String,
    },

    /// A reply or output channel could not be resolved by name.
    #[error("unknown channel '{channel}'")]
    UnknownChannel {
        /// Name that failed to resolve.
        channel: String,
    },

    /// A request/reply exchange did not complete in time.
    #[error("no reply received within {timeout:?}")]
    ReplyTimeout {
        /// The reply timeout.
        timeout: Duration,
    },

    /// The remote side of a request/reply exchange answered with an error message.
    #[error("remote failure ({label}): {message}")]
    Remote {
        /// Label of the original error.
        label: String,
        /// Human-readable message of the original error.
        message: String,
    },

    /// A scheduled task failed an attempt.
    #[error("task '{task}' failed: {reason}")]
    TaskFailed {
        /// Task name.
        task: String,
        /// Failure description.
        reason: String,
    },
}

impl MessagingError {
    /// Shorthand for [`MessagingError::Handler`].
    pub fn handler(error: impl std::fmt::Display) -> Self {
        MessagingError::Handler {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs and error payloads.
    ///
    /// # Example
    /// ```
    /// use msgbus::MessagingError;
    ///
    /// let err = MessagingError::handler("boom");
    /// assert_eq!(err.as_label(), "handler_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            MessagingError::ChannelFull { .. } => "channel_full",
            MessagingError::ChannelClosed { .. } => "channel_closed",
            MessagingError::SendTimeout { .. } => "send_timeout",
            MessagingError::NoTargets { .. } => "no_targets",
            MessagingError::Rejected { .. } => "rejected",
            MessagingError::Handler { .. } => "handler_failed",
            MessagingError::UnknownChannel { .. } => "unknown_channel",
            MessagingError::ReplyTimeout { .. } => "reply_timeout",
            MessagingError::Remote { .. } => "remote_failure",
            MessagingError::TaskFailed { .. } => "task_failed",
        }
    }
}

/// # Wiring errors detected while registering or activating components.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// An endpoint was activated without subscription metadata.
    #[error("unable to activate endpoint '{endpoint}': no subscription information is available")]
    MissingSubscription {
        /// Endpoint name.
        endpoint: String,
    },

    /// A subscription names a channel that is not registered.
    #[error(
        "cannot activate subscription, unknown channel '{channel}'; consider enabling the 'auto_create_channels' option"
    )]
    UnknownChannel {
        /// Channel name.
        channel: String,
    },

    /// A handler endpoint names an unregistered default output channel.
    #[error(
        "unknown channel '{channel}' configured as default output for endpoint '{endpoint}'; consider enabling the 'auto_create_channels' option"
    )]
    UnknownOutputChannel {
        /// Channel name.
        channel: String,
        /// Endpoint name.
        endpoint: String,
    },

    /// A component that is already registered under one name was registered under another.
    #[error("'{current}' is already registered and cannot be renamed to '{requested}'")]
    Renamed {
        /// Name assigned at first registration.
        current: String,
        /// Name requested now.
        requested: String,
    },

    /// A scheduled (polling) subscription was made to a direct channel, which cannot be polled.
    #[error("endpoint '{endpoint}' cannot poll direct channel '{channel}'")]
    PolledDirectChannel {
        /// Channel name.
        channel: String,
        /// Endpoint name.
        endpoint: String,
    },
}

impl ConfigurationError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigurationError::MissingSubscription { .. } => "config_missing_subscription",
            ConfigurationError::UnknownChannel { .. } => "config_unknown_channel",
            ConfigurationError::UnknownOutputChannel { .. } => "config_unknown_output_channel",
            ConfigurationError::Renamed { .. } => "config_renamed",
            ConfigurationError::PolledDirectChannel { .. } => "config_polled_direct_channel",
        }
    }
}

/// # Errors produced by bus lifecycle transitions.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Stopping exceeded its grace period; some scheduled tasks were still running and got aborted.
    #[error("stop timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of the tasks that did not stop in time.
        stuck: Vec<String>,
    },

    /// Starting the bus failed because the wiring is invalid.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Registering the OS signal listener failed.
    #[error("failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use msgbus::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Configuration(e) => e.as_label(),
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

/// # Errors raised by a single attempt of a scheduled task.
///
/// `Timeout` and `Fail` are retried with backoff; `Fatal` stops the task for good;
/// `Canceled` is a graceful exit.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// The attempt exceeded its timeout.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Non-recoverable error (no retry).
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// The attempt failed but may succeed if retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The task observed cancellation.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use msgbus::TaskError;
    /// use std::time::Duration;
    ///
    /// let err = TaskError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "task_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// True for errors that are worth another attempt (`Fail`, `Timeout`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. } | TaskError::Timeout { .. })
    }
}

impl From<MessagingError> for TaskError {
    fn from(err: MessagingError) -> Self {
        TaskError::Fail {
            error: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messaging_error_from_task_conversion_is_retryable() {
        let err: TaskError = MessagingError::ChannelFull {
            channel: "orders".into(),
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "execution failed: channel 'orders' is full");
    }

    #[test]
    fn configuration_error_passes_through_runtime_label() {
        let err = RuntimeError::from(ConfigurationError::UnknownChannel {
            channel: "missing".into(),
        });
        assert_eq!(err.as_label(), "config_unknown_channel");
        assert!(err.to_string().contains("unknown channel 'missing'"));
    }
}
