//! # Backoff schedule between retries.
//!
//! [`BackoffPolicy`] maps a 0-based retry index `n` to a sleep:
//! `first × factor^n`, clamped to `max`, then jittered.
//!
//! The base is derived from `n` alone, so jitter output never feeds into later
//! delays and randomized schedules cannot drift downward.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use taskgate::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(3), Duration::from_millis(800));
//! assert_eq!(backoff.next(10), Duration::from_secs(10)); // capped
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Exponential retry backoff.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first retry (the "base delay").
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`2.0` = doubling).
    pub factor: f64,
    /// Randomization applied to the clamped base.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 100ms`, `factor = 2.0`, `max = 30s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Constant delay (`factor = 1.0`).
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Returns the same policy with a different jitter strategy.
    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the delay for 0-based retry index `n`.
    ///
    /// Non-finite or out-of-range intermediate values clamp to [`BackoffPolicy::max`].
    pub fn next(&self, n: u32) -> Duration {
        let exp = n.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            other => other.apply(base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubling(jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn default_is_plain_doubling_from_100ms() {
        let policy = BackoffPolicy::default();
        let got: Vec<_> = (0..5).map(|n| policy.next(n).as_millis()).collect();
        assert_eq!(got, vec![100, 200, 400, 800, 1600]);
    }

    #[test]
    fn constant_never_grows() {
        let policy = BackoffPolicy::constant(Duration::from_millis(250));
        for n in 0..20 {
            assert_eq!(policy.next(n), Duration::from_millis(250));
        }
    }

    #[test]
    fn first_larger_than_max_is_capped() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(10),
            max: Duration::from_secs(5),
            ..doubling(JitterPolicy::None)
        };
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn overflowing_exponent_clamps_to_max() {
        let policy = doubling(JitterPolicy::None);
        assert_eq!(policy.next(200), Duration::from_secs(30));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn full_jitter_stays_under_base() {
        let policy = doubling(JitterPolicy::Full);
        for n in 0..12 {
            let base = doubling(JitterPolicy::None).next(n);
            assert!(policy.next(n) <= base, "retry {n}");
        }
    }

    #[test]
    fn equal_jitter_keeps_at_least_half() {
        let policy = doubling(JitterPolicy::Equal);
        for n in 0..12 {
            let base = doubling(JitterPolicy::None).next(n);
            let delay = policy.next(n);
            assert!(delay >= base / 2 && delay <= base, "retry {n}: {delay:?}");
        }
    }

    #[test]
    fn decorrelated_jitter_respects_floor_and_cap() {
        let policy = doubling(JitterPolicy::Decorrelated);
        for _ in 0..100 {
            let delay = policy.next(8);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_secs(30));
        }
    }
}
