//! # Bus configuration.
//!
//! [`BusConfig`] holds every tunable of a [`MessageBus`](crate::MessageBus). Sentinel values
//! (`0` for "unlimited" or "none") are resolved through the accessor methods; use those
//! instead of checking fields directly.
//!
//! ```rust
//! use std::time::Duration;
//! use msgbus::BusConfig;
//!
//! let cfg = BusConfig {
//!     auto_create_channels: true,
//!     grace: Duration::from_secs(5),
//!     ..BusConfig::default()
//! };
//! assert_eq!(cfg.pool_limit(), Some(10));
//! assert_eq!(cfg.send_timeout(), None);
//! ```

use std::time::Duration;

use crate::endpoints::ConcurrencyPolicy;
use crate::scheduling::BackoffPolicy;

use super::message_bus::DEFAULT_DISPATCHER_POOL_SIZE;

/// Configuration of a [`MessageBus`](crate::MessageBus).
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Upper bound of in-flight deliveries across all dispatchers (`0` = unlimited).
    pub dispatcher_pool_size: usize,

    /// Start the bus at the end of [`MessageBusBuilder::launch`](crate::MessageBusBuilder::launch).
    pub auto_startup: bool,

    /// Create unknown channels named by subscriptions and default outputs instead of
    /// failing activation.
    pub auto_create_channels: bool,

    /// Concurrency policy for endpoints registered without one (`None` = inline handling).
    pub default_concurrency: Option<ConcurrencyPolicy>,

    /// Capacity of auto-created queue channels.
    pub queue_capacity: usize,

    /// Capacity of the default error channel.
    pub error_channel_capacity: usize,

    /// Ring buffer size of the runtime event bus (min 1).
    pub event_capacity: usize,

    /// How long `stop()` waits for scheduled tasks before aborting them.
    pub grace: Duration,

    /// Wait bound used by the bus for queue sends (`0` = wait for capacity forever).
    pub send_timeout: Duration,

    /// Default per-attempt timeout of scheduled tasks (`0` = none).
    pub task_timeout: Duration,

    /// Default retry backoff of scheduled tasks.
    pub backoff: BackoffPolicy,
}

impl BusConfig {
    /// Delivery pool size, `None` when unlimited.
    #[inline]
    pub fn pool_limit(&self) -> Option<usize> {
        match self.dispatcher_pool_size {
            0 => None,
            n => Some(n),
        }
    }

    /// Send timeout, `None` when sends wait forever.
    #[inline]
    pub fn send_timeout(&self) -> Option<Duration> {
        Some(self.send_timeout).filter(|d| !d.is_zero())
    }

    /// Task timeout, `None` when attempts are unbounded.
    #[inline]
    pub fn task_timeout(&self) -> Option<Duration> {
        Some(self.task_timeout).filter(|d| !d.is_zero())
    }

    /// Event bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn event_capacity_clamped(&self) -> usize {
        self.event_capacity.max(1)
    }
}

impl Default for BusConfig {
    /// - `dispatcher_pool_size = 10`
    /// - `auto_startup = true`, `auto_create_channels = false`
    /// - `default_concurrency = None`
    /// - `queue_capacity = 100`, `error_channel_capacity = 100`, `event_capacity = 1024`
    /// - `grace = 30s`, `send_timeout = 0s`, `task_timeout = 0s`
    /// - `backoff = BackoffPolicy::default()`
    fn default() -> Self {
        Self {
            dispatcher_pool_size: DEFAULT_DISPATCHER_POOL_SIZE,
            auto_startup: true,
            auto_create_channels: false,
            default_concurrency: None,
            queue_capacity: 100,
            error_channel_capacity: 100,
            event_capacity: 1024,
            grace: Duration::from_secs(30),
            send_timeout: Duration::ZERO,
            task_timeout: Duration::ZERO,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sentinels_mean_unbounded() {
        let cfg = BusConfig {
            dispatcher_pool_size: 0,
            event_capacity: 0,
            ..BusConfig::default()
        };
        assert_eq!(cfg.pool_limit(), None);
        assert_eq!(cfg.send_timeout(), None);
        assert_eq!(cfg.task_timeout(), None);
        assert_eq!(cfg.event_capacity_clamped(), 1);
    }

    #[test]
    fn non_zero_timeouts_are_kept() {
        let cfg = BusConfig {
            send_timeout: Duration::from_millis(250),
            task_timeout: Duration::from_secs(3),
            ..BusConfig::default()
        };
        assert_eq!(cfg.send_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.task_timeout(), Some(Duration::from_secs(3)));
    }
}
