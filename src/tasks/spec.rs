//! # Per-task submission options.
//!
//! [`TaskOptions`] selects which gates a submission goes through and how it is
//! retried:
//!
//! ```text
//! rate_limiter      ─► RateLimitStage     (None = not rate limited)
//! circuit_breaker   ─► CircuitStage       (None = no breaker)
//! concurrency_group ─► ConcurrencyStage   (None = orchestrator-wide cap)
//! retry             ─► RetryStage         (max_retries = 0 = single attempt)
//! timeout           ─► TimeoutStage       (None = no deadline)
//! listeners         ─► registered on the bus before `task:queued`
//! ```
//!
//! Options can be created:
//! - **Explicitly** with [`TaskOptions::new`] and the `with_*` setters
//! - **From config** with [`TaskOptions::with_defaults`] (inherit backoff/timeout)

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::control::CircuitBreakerConfig;
use crate::core::OrchestratorConfig;
use crate::error::ExecError;
use crate::events::{Event, EventKind, Listener};
use crate::policies::{BackoffPolicy, RetryPolicy};

/// Circuit breaker selection for a task.
///
/// Breakers are shared by name: the first submission that names a breaker
/// creates it with its `config`; later submissions reuse the existing one.
#[derive(Clone, Debug)]
pub struct CircuitOptions {
    /// Breaker name (shared key).
    pub name: Cow<'static, str>,
    /// Thresholds used if the breaker does not exist yet.
    pub config: CircuitBreakerConfig,
}

/// Task-scoped listeners attached before submission.
#[derive(Clone, Default)]
pub(crate) struct TaskListeners(Vec<(EventKind, Listener)>);

impl fmt::Debug for TaskListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter().map(|(kind, _)| kind)).finish()
    }
}

/// Options for one submission.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use taskgate::{CircuitBreakerConfig, TaskOptions};
///
/// let opts = TaskOptions::new()
///     .with_retries(3)
///     .with_base_delay(Duration::from_millis(50))
///     .with_timeout(Duration::from_secs(2))
///     .with_rate_limiter("api")
///     .with_circuit_breaker("upstream", CircuitBreakerConfig::default());
///
/// assert_eq!(opts.retry().max_retries, 3);
/// assert_eq!(opts.timeout(), Some(Duration::from_secs(2)));
/// ```
#[derive(Clone, Debug, Default)]
pub struct TaskOptions {
    rate_limiter: Option<Cow<'static, str>>,
    concurrency_group: Option<Cow<'static, str>>,
    circuit_breaker: Option<CircuitOptions>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    listeners: TaskListeners,
}

impl TaskOptions {
    /// Options with no gates: one attempt, no deadline, 100ms base delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inherits backoff and timeout from the orchestrator config.
    ///
    /// `cfg.timeout = 0s` is treated as no deadline.
    pub fn with_defaults(cfg: &OrchestratorConfig) -> Self {
        Self {
            retry: RetryPolicy {
                backoff: cfg.backoff,
                ..RetryPolicy::default()
            },
            timeout: cfg.default_timeout(),
            ..Self::default()
        }
    }

    /// Routes the task through the named rate limiter.
    pub fn with_rate_limiter(mut self, key: impl Into<Cow<'static, str>>) -> Self {
        self.rate_limiter = Some(key.into());
        self
    }

    /// Runs the task under the named concurrency group instead of the global cap.
    pub fn with_concurrency_group(mut self, group: impl Into<Cow<'static, str>>) -> Self {
        self.concurrency_group = Some(group.into());
        self
    }

    /// Guards the task with a named circuit breaker.
    pub fn with_circuit_breaker(
        mut self,
        name: impl Into<Cow<'static, str>>,
        config: CircuitBreakerConfig,
    ) -> Self {
        self.circuit_breaker = Some(CircuitOptions {
            name: name.into(),
            config,
        });
        self
    }

    /// Sets the number of retries after the first attempt.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry (doubles on each further retry).
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.retry.backoff.first = delay;
        self
    }

    /// Replaces the whole backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.retry.backoff = backoff;
        self
    }

    /// Replaces the retry predicate (default: [`ExecError::is_retryable`]).
    pub fn with_retryable<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ExecError) -> bool + Send + Sync + 'static,
    {
        self.retry.retryable = Some(Arc::new(predicate));
        self
    }

    /// Sets a per-attempt deadline; `Duration::ZERO` disables it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Listens to `kind` events of this task, starting with `task:queued`.
    ///
    /// The listener is registered during `submit`, before any event of the
    /// task is published, and removed when the task finishes. Cloned options
    /// share the callback, so each submission gets its own registration.
    pub fn with_listener<F>(mut self, kind: EventKind, f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listeners.0.push((kind, Arc::new(f)));
        self
    }

    pub(crate) fn take_listeners(&mut self) -> Vec<(EventKind, Listener)> {
        std::mem::take(&mut self.listeners.0)
    }

    /// Rate limiter key, if any.
    pub fn rate_limiter(&self) -> Option<&str> {
        self.rate_limiter.as_deref()
    }

    /// Concurrency group, if any.
    pub fn concurrency_group(&self) -> Option<&str> {
        self.concurrency_group.as_deref()
    }

    /// Circuit breaker selection, if any.
    pub fn circuit_breaker(&self) -> Option<&CircuitOptions> {
        self.circuit_breaker.as_ref()
    }

    /// Retry policy.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Per-attempt deadline, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_inherit_backoff_and_deadline_from_config() {
        let mut cfg = OrchestratorConfig::default();
        cfg.backoff = BackoffPolicy {
            first: Duration::from_millis(40),
            max: Duration::from_millis(500),
            ..BackoffPolicy::default()
        };
        cfg.timeout = Duration::from_secs(3);

        let opts = TaskOptions::with_defaults(&cfg);
        assert_eq!(opts.timeout(), Some(Duration::from_secs(3)));
        assert_eq!(opts.retry().max_retries, 0);
        assert_eq!(opts.retry().backoff.first, Duration::from_millis(40));
        assert_eq!(opts.retry().delay_before(2), Duration::from_millis(80));
        assert_eq!(opts.retry().delay_before(10), Duration::from_millis(500));
        assert!(opts.rate_limiter().is_none() && opts.circuit_breaker().is_none());

        cfg.timeout = Duration::ZERO;
        let opts = TaskOptions::with_defaults(&cfg).with_retries(2);
        assert_eq!(opts.timeout(), None);
        assert_eq!(opts.retry().max_retries, 2);
    }

    #[test]
    fn zero_timeout_clears_the_deadline() {
        let opts = TaskOptions::new()
            .with_timeout(Duration::from_secs(1))
            .with_timeout(Duration::ZERO);
        assert_eq!(opts.timeout(), None);
    }

    #[test]
    fn listeners_are_taken_once() {
        let mut opts = TaskOptions::new()
            .with_listener(EventKind::TaskQueued, |_| {})
            .with_listener(EventKind::TaskRetry, |_| {});
        assert_eq!(format!("{:?}", opts.listeners), "[TaskQueued, TaskRetry]");

        let kinds: Vec<_> = opts.take_listeners().into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![EventKind::TaskQueued, EventKind::TaskRetry]);
        assert!(opts.take_listeners().is_empty());
    }
}
