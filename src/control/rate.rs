//! # Sliding-window rate limiter.
//!
//! [`RateLimiter`] admits at most `max_requests` callers in any trailing
//! `window`. It keeps the admission instants in a queue, pruned lazily on every
//! check, so the queue never holds timestamps older than the window.
//!
//! ```text
//!   now - window                        now
//!        │  t0     t1        t2          │
//!   ─────┼──●──────●─────────●───────────┼──►
//!        │◄──────────── window ─────────►│
//!
//!   len < max  → record now, admit
//!   len == max → wait (t0 + window - now), or reject with that delay
//! ```
//!
//! The limiter reads time from a [`Clock`]. [`Overflow::Wait`] sleeps on tokio's
//! timer, so it needs a clock that follows tokio time ([`TokioClock`]); a
//! [`ManualClock`](crate::ManualClock) suits `try_admit` driven tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::{Clock, TokioClock};
use crate::error::{ConfigError, ExecError};

/// What a full window does to a caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Overflow {
    /// Sleep until the oldest admission leaves the window, then try again.
    #[default]
    Wait,
    /// Fail immediately with [`ExecError::RateLimited`].
    Reject,
}

/// Rate limiter settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Admissions allowed per window. Must be > 0.
    pub max_requests: u32,
    /// Window length. Must be > 0.
    pub window: Duration,
    /// Behaviour when the window is full.
    pub overflow: Overflow,
}

impl RateLimitConfig {
    /// `max_requests` per `window`, waiting on overflow.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            overflow: Overflow::Wait,
        }
    }

    /// Same limits, rejecting on overflow.
    pub fn rejecting(mut self) -> Self {
        self.overflow = Overflow::Reject;
        self
    }

    pub(crate) fn validate(&self, key: &str) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::InvalidMaxRequests { key: key.into() });
        }
        if self.window.is_zero() {
            return Err(ConfigError::InvalidWindow { key: key.into() });
        }
        Ok(())
    }
}

/// Sliding-window admission gate.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use taskgate::{RateLimitConfig, RateLimiter};
///
/// let limiter = RateLimiter::new("api", RateLimitConfig::new(2, Duration::from_secs(1))).unwrap();
/// assert!(limiter.try_admit().is_ok());
/// assert!(limiter.try_admit().is_ok());
///
/// let retry_after = limiter.try_admit().unwrap_err();
/// assert!(retry_after <= Duration::from_secs(1));
/// ```
pub struct RateLimiter {
    key: Arc<str>,
    cfg: RateLimitConfig,
    clock: Arc<dyn Clock>,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter on tokio time.
    ///
    /// # Errors
    /// [`ConfigError`] if `max_requests` or `window` is zero.
    pub fn new(key: impl Into<Arc<str>>, cfg: RateLimitConfig) -> Result<Self, ConfigError> {
        Self::with_clock(key, cfg, Arc::new(TokioClock))
    }

    /// Creates a limiter reading time from `clock`.
    ///
    /// # Errors
    /// [`ConfigError`] if `max_requests` or `window` is zero.
    pub fn with_clock(
        key: impl Into<Arc<str>>,
        cfg: RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let key = key.into();
        cfg.validate(&key)?;
        Ok(Self {
            key,
            cfg,
            clock,
            admitted: Mutex::new(VecDeque::with_capacity(cfg.max_requests as usize)),
        })
    }

    /// Limiter key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Limiter settings.
    pub fn config(&self) -> &RateLimitConfig {
        &self.cfg
    }

    /// Admits now if the window has room; otherwise returns the time until it will.
    pub fn try_admit(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut admitted = self.admitted();
        self.prune(&mut admitted, now);

        if admitted.len() < self.cfg.max_requests as usize {
            admitted.push_back(now);
            return Ok(());
        }

        let delay = admitted
            .front()
            .map(|oldest| (*oldest + self.cfg.window).saturating_duration_since(now))
            .unwrap_or_default();
        Err(delay)
    }

    /// Waits for a slot (or rejects, per [`Overflow`]).
    ///
    /// # Errors
    /// - [`ExecError::RateLimited`] when the window is full and overflow is `Reject`.
    /// - [`ExecError::Canceled`] if `cancel` fires while waiting.
    pub async fn admit(&self, cancel: &CancellationToken) -> Result<(), ExecError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ExecError::Canceled);
            }
            let delay = match self.try_admit() {
                Ok(()) => return Ok(()),
                Err(delay) => delay,
            };
            if self.cfg.overflow == Overflow::Reject {
                return Err(ExecError::RateLimited { retry_after: delay });
            }

            debug!(limiter = %self.key, delay_ms = delay.as_millis() as u64, "rate window full, waiting");
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExecError::Canceled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Admissions currently inside the window.
    pub fn in_window(&self) -> usize {
        let now = self.clock.now();
        let mut admitted = self.admitted();
        self.prune(&mut admitted, now);
        admitted.len()
    }

    fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = admitted.front() {
            if now.saturating_duration_since(*oldest) >= self.cfg.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn admitted(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.admitted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("key", &self.key)
            .field("cfg", &self.cfg)
            .finish()
    }
}
