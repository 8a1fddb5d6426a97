//! # Retry backoff for failing tasks.

use std::time::Duration;

use rand::Rng;

/// Delay policy between failed attempts.
///
/// The base delay for the n-th consecutive failure (0-indexed) is `first × factor^n`,
/// clamped to `max`. With `jitter`, the delay is drawn from `[base/2, base]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` for growing delays).
    pub factor: f64,
    /// Spread delays randomly to avoid synchronized retries.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    /// `first = 100ms`, `max = 30s`, `factor = 2.0`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Constant delay without jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: false,
        }
    }

    /// Delay after `failures` consecutive failures (0 = first failure).
    pub fn next(&self, failures: u32) -> Duration {
        let exp = failures.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };

        if self.jitter {
            equal_jitter(base)
        } else {
            base
        }
    }
}

/// `delay/2 + random[0, delay/2]`.
fn equal_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
    let half = ms / 2;
    if half == 0 {
        return delay;
    }
    Duration::from_millis(half + rand::rng().random_range(0..=half))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: false,
        }
    }

    #[test]
    fn grows_exponentially_until_capped() {
        let p = policy(100, 1_000, 2.0);
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(3), Duration::from_millis(800));
        assert_eq!(p.next(4), Duration::from_millis(1_000));
        assert_eq!(p.next(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn first_above_max_is_clamped() {
        assert_eq!(policy(10_000, 5_000, 2.0).next(0), Duration::from_millis(5_000));
    }

    #[test]
    fn fixed_is_constant() {
        let p = BackoffPolicy::fixed(Duration::from_millis(250));
        for n in 0..5 {
            assert_eq!(p.next(n), Duration::from_millis(250));
        }
    }

    #[test]
    fn jitter_stays_within_upper_half() {
        let p = BackoffPolicy {
            jitter: true,
            ..policy(1_000, 30_000, 1.0)
        };
        for n in 0..50 {
            let d = p.next(n);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1_000));
        }
    }
}
