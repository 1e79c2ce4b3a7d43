//! # Jitter for retry delays.
//!
//! - [`JitterPolicy::None`] exact backoff (default, matches plain doubling)
//! - [`JitterPolicy::Full`] random in `[0, delay]`
//! - [`JitterPolicy::Equal`] `delay/2 + random[0, delay/2]`
//! - [`JitterPolicy::Decorrelated`] random in `[base, prev × 3]`, capped

use std::time::Duration;

use rand::Rng;

/// Randomization applied to a backoff delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Exact delays.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
    /// Uniform in `[base, prev × 3]`, capped at max.
    /// Needs context; see [`JitterPolicy::apply_decorrelated`].
    Decorrelated,
}

impl JitterPolicy {
    /// Applies jitter to `delay`. `Decorrelated` returns `delay` unchanged.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None | JitterPolicy::Decorrelated => delay,
            JitterPolicy::Full => Self::uniform(0, millis(delay)),
            JitterPolicy::Equal => {
                let ms = millis(delay);
                let half = ms / 2;
                Self::uniform(half, ms)
            }
        }
    }

    /// Decorrelated jitter with explicit `base`, previous delay and `max`.
    ///
    /// Falls back to [`JitterPolicy::apply`] on `prev` for other variants.
    pub fn apply_decorrelated(&self, base: Duration, prev: Duration, max: Duration) -> Duration {
        if !matches!(self, JitterPolicy::Decorrelated) {
            return self.apply(prev);
        }
        let lo = millis(base);
        let hi = millis(prev).saturating_mul(3).min(millis(max)).max(lo);
        Self::uniform(lo, hi)
    }

    fn uniform(lo: u64, hi: u64) -> Duration {
        if lo >= hi {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

#[inline]
fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
