//! Error types used by the taskgate runtime, its gates and operations.
//!
//! - [`ConfigError`]: invalid configuration, reported at construction/submission.
//! - [`TaskError`]: errors returned by an [`Operation`](crate::Operation) body.
//! - [`ExecError`]: why one pass through the admission pipeline failed.
//! - [`TaskFailure`]: what [`TaskHandle::wait`](crate::TaskHandle::wait) rejects with
//!   (an [`ExecError`] plus task id and attempt count).
//! - [`SubmitError`]: `submit` refused the task before it was queued.
//! - [`BusError`]: an `error` event was emitted with nobody listening.
//! - [`RuntimeError`]: the orchestrator itself failed (shutdown grace exceeded).
//!
//! Most types provide `as_label` (stable snake_case for logs/metrics) in addition
//! to their `Display` message.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::tasks::TaskId;

/// # Invalid configuration.
///
/// Raised eagerly: by [`OrchestratorBuilder::build`](crate::OrchestratorBuilder::build)
/// for orchestrator-wide settings, by `submit` for per-task options, and by the
/// standalone gate constructors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A rate limiter was configured with `max_requests == 0`.
    #[error("rate limiter '{key}': max_requests must be greater than zero")]
    InvalidMaxRequests { key: String },

    /// A rate limiter was configured with a zero window.
    #[error("rate limiter '{key}': window must be greater than zero")]
    InvalidWindow { key: String },

    /// A concurrency limit of zero was configured.
    #[error("concurrency group '{group}': max_concurrent must be greater than zero")]
    InvalidMaxConcurrent { group: String },

    /// A circuit breaker was configured with `failure_threshold == 0`.
    #[error("circuit breaker '{name}': failure_threshold must be greater than zero")]
    InvalidFailureThreshold { name: String },

    /// A circuit breaker was configured with a zero failure window.
    #[error("circuit breaker '{name}': window must be greater than zero")]
    InvalidBreakerWindow { name: String },

    /// Task options reference a rate limiter that was never configured.
    #[error("unknown rate limiter '{0}'")]
    UnknownRateLimiter(String),

    /// Task options reference a concurrency group that was never configured.
    #[error("unknown concurrency group '{0}'")]
    UnknownConcurrencyGroup(String),
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::InvalidMaxRequests { .. } => "config_invalid_max_requests",
            ConfigError::InvalidWindow { .. } => "config_invalid_window",
            ConfigError::InvalidMaxConcurrent { .. } => "config_invalid_max_concurrent",
            ConfigError::InvalidFailureThreshold { .. } => "config_invalid_failure_threshold",
            ConfigError::InvalidBreakerWindow { .. } => "config_invalid_breaker_window",
            ConfigError::UnknownRateLimiter(_) => "config_unknown_rate_limiter",
            ConfigError::UnknownConcurrencyGroup(_) => "config_unknown_concurrency_group",
        }
    }
}

/// # Errors returned by operation bodies.
///
/// `Fail` is retryable by default, `Fatal` never is. `Canceled` is how a body
/// acknowledges its cancellation token.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Non-recoverable error (never retried by the default predicate).
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Execution failed but may succeed if retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The body observed its cancellation token and stopped.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for a retryable [`TaskError::Fail`].
    pub fn fail(error: impl std::fmt::Display) -> Self {
        TaskError::Fail {
            error: error.to_string(),
        }
    }

    /// Shorthand for a non-retryable [`TaskError::Fatal`].
    pub fn fatal(error: impl std::fmt::Display) -> Self {
        TaskError::Fatal {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// ```
    /// use taskgate::TaskError;
    ///
    /// assert_eq!(TaskError::fail("boom").as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Indicates whether the error is safe to retry (`Fail` only).
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. })
    }
}

/// # Why a task did not produce a value.
///
/// Produced by the gates ([`RateLimiter`](crate::RateLimiter),
/// [`CircuitBreaker`](crate::CircuitBreaker), [`ConcurrencyLimiter`](crate::ConcurrencyLimiter),
/// [`retry`](crate::retry), [`with_timeout`](crate::with_timeout)) and by operation bodies
/// (wrapped as [`ExecError::Task`]).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// The rate window is full and the limiter rejects instead of waiting.
    #[error("rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// Time until the oldest admission leaves the window.
        retry_after: Duration,
    },

    /// The circuit breaker is open (or its half-open trial is taken).
    #[error("circuit '{breaker}' is open")]
    CircuitOpen {
        /// Breaker name.
        breaker: Arc<str>,
    },

    /// The attempt did not settle before its deadline.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The caller (or orchestrator shutdown) cancelled the task.
    #[error("cancelled")]
    Canceled,

    /// Every permitted attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Total number of attempts made (`max_retries + 1`).
        attempts: u32,
        /// The error of the last attempt.
        source: Box<ExecError>,
    },

    /// The operation body returned an error.
    #[error(transparent)]
    Task(TaskError),

    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<TaskError> for ExecError {
    /// Maps a body's own cancellation acknowledgement onto [`ExecError::Canceled`].
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Canceled => ExecError::Canceled,
            other => ExecError::Task(other),
        }
    }
}

impl ExecError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// ```
    /// use std::time::Duration;
    /// use taskgate::ExecError;
    ///
    /// let err = ExecError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecError::RateLimited { .. } => "rate_limited",
            ExecError::CircuitOpen { .. } => "circuit_open",
            ExecError::Timeout { .. } => "timeout",
            ExecError::Canceled => "canceled",
            ExecError::RetryExhausted { .. } => "retry_exhausted",
            ExecError::Task(e) => e.as_label(),
            ExecError::Config(e) => e.as_label(),
        }
    }

    /// Default retry predicate: `TaskError::Fail` and `Timeout` are retryable.
    ///
    /// ```
    /// use taskgate::{ExecError, TaskError};
    ///
    /// assert!(ExecError::from(TaskError::fail("boom")).is_retryable());
    /// assert!(!ExecError::from(TaskError::fatal("nope")).is_retryable());
    /// assert!(!ExecError::Canceled.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecError::Timeout { .. } => true,
            ExecError::Task(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// True for caller-initiated cancellation.
    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, ExecError::Canceled)
    }

    /// True if the error, or the last attempt behind a `RetryExhausted`, is a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            ExecError::Timeout { .. } => true,
            ExecError::RetryExhausted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// # Final rejection of a task handle.
///
/// Carries the task id and the attempt counter (number of retries performed)
/// alongside the most specific [`ExecError`].
#[derive(Error, Debug, Clone)]
#[error("task {id} failed (attempt {attempt}): {error}")]
pub struct TaskFailure {
    /// Id of the failed task.
    pub id: TaskId,
    /// Retry counter at the time of failure (`0` = first attempt).
    pub attempt: u32,
    /// The underlying error.
    #[source]
    pub error: ExecError,
}

impl TaskFailure {
    /// Returns the label of the underlying error.
    pub fn as_label(&self) -> &'static str {
        self.error.as_label()
    }
}

/// Error returned by [`Orchestrator::submit`](crate::Orchestrator::submit).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The task options are invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The orchestrator is shutting down.
    #[error("orchestrator is closed")]
    Closed,
}

/// Error returned by [`Bus::emit`](crate::Bus::emit).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// An `error` event was emitted with no `error` listener registered.
    #[error("unhandled error event: {reason}")]
    UnhandledError {
        /// Reason carried by the event.
        reason: String,
    },
}

/// # Errors produced by the orchestrator runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some tasks were still running.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of tasks that did not finish in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}
