//! # Retry policy.
//!
//! [`RetryPolicy`] bundles the retry budget, the predicate that decides which
//! errors are worth another attempt, and the [`BackoffPolicy`] that spaces the
//! attempts out.
//!
//! The predicate is the only authority on retryability: a non-retryable error
//! ends the task immediately, whatever budget is left. Cancellation is never
//! offered to the predicate.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ExecError;
use crate::policies::backoff::BackoffPolicy;

/// Shared retry predicate.
pub type RetryPredicate = Arc<dyn Fn(&ExecError) -> bool + Send + Sync>;

/// How a task is re-executed after failed attempts.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt (`0` = single attempt).
    pub max_retries: u32,
    /// Delay schedule between attempts.
    pub backoff: BackoffPolicy,
    /// Custom predicate; `None` uses [`ExecError::is_retryable`].
    pub retryable: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Creates a policy with `max_retries` and the default backoff/predicate.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Whether `err` may be retried (budget aside).
    pub fn is_retryable(&self, err: &ExecError) -> bool {
        if err.is_canceled() {
            return false;
        }
        match &self.retryable {
            Some(pred) => pred(err),
            None => err.is_retryable(),
        }
    }

    /// Delay before retry number `retry` (1-based): `first × factor^(retry-1)`.
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.backoff.next(retry.saturating_sub(1))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("retryable", &self.retryable.as_ref().map(|_| "custom"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;

    #[test]
    fn default_predicate_follows_error_kind() {
        let policy = RetryPolicy::new(3);
        assert!(policy.is_retryable(&TaskError::fail("flaky").into()));
        assert!(policy.is_retryable(&ExecError::Timeout {
            timeout: Duration::from_secs(1)
        }));
        assert!(!policy.is_retryable(&TaskError::fatal("bad input").into()));
    }

    #[test]
    fn custom_predicate_is_the_only_authority() {
        let mut policy = RetryPolicy::new(3);
        policy.retryable = Some(Arc::new(|e: &ExecError| e.as_label() == "task_fatal"));

        assert!(policy.is_retryable(&TaskError::fatal("retry me anyway").into()));
        assert!(!policy.is_retryable(&TaskError::fail("not this one").into()));
    }

    #[test]
    fn cancellation_is_never_retryable() {
        let mut policy = RetryPolicy::new(3);
        policy.retryable = Some(Arc::new(|_| true));
        assert!(!policy.is_retryable(&ExecError::Canceled));
    }

    #[test]
    fn delay_doubles_per_retry() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.delay_before(1), Duration::from_millis(100));
        assert_eq!(policy.delay_before(2), Duration::from_millis(200));
        assert_eq!(policy.delay_before(3), Duration::from_millis(400));
    }
}
