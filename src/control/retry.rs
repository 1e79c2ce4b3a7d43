//! # Retry loop with exponential backoff.
//!
//! [`retry`] re-runs an operation according to a [`RetryPolicy`]:
//!
//! ```text
//! attempt 0 ─► Err(e) ─► retryable(e)? ── no ──► Err(e) (unwrapped)
//!                            │ yes
//!                            ▼
//!                 attempt < max_retries? ── no ──► Err(RetryExhausted { attempts, e })
//!                            │ yes
//!                            ▼
//!              on_retry(notice) ─► sleep(base × 2^attempt) ─► attempt + 1
//! ```
//!
//! Cancellation is never retried, and the backoff sleep races the token.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ExecError;
use crate::policies::RetryPolicy;

/// Passed to the `on_retry` callback before each backoff sleep.
#[derive(Debug, Clone, Copy)]
pub struct RetryNotice<'a> {
    /// The upcoming retry (1-based).
    pub attempt: u32,
    /// Sleep before it starts.
    pub delay: Duration,
    /// Error of the attempt that just failed.
    pub error: &'a ExecError,
}

/// Runs `op` until it succeeds, fails permanently or runs out of retries.
///
/// `op` receives the 0-based attempt number.
///
/// # Errors
/// - the error itself if it is not retryable, or if `max_retries == 0`;
/// - [`ExecError::RetryExhausted`] once every allowed attempt failed;
/// - [`ExecError::Canceled`] if `cancel` fires.
///
/// # Example
/// ```rust
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use taskgate::{retry, ExecError, RetryPolicy, TaskError};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let calls = AtomicU32::new(0);
/// let out = retry(&RetryPolicy::new(3), &CancellationToken::new(), |_| {}, |attempt| {
///     calls.fetch_add(1, Ordering::SeqCst);
///     async move {
///         if attempt < 1 { Err(ExecError::from(TaskError::fail("flaky"))) } else { Ok(attempt) }
///     }
/// })
/// .await;
/// assert_eq!(out.unwrap(), 1);
/// assert_eq!(calls.load(Ordering::SeqCst), 2);
/// # }
/// ```
pub async fn retry<F, Fut, T, N>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut on_retry: N,
    mut op: F,
) -> Result<T, ExecError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ExecError>>,
    N: FnMut(RetryNotice<'_>),
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(ExecError::Canceled);
        }

        let err = match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if err.is_canceled() || cancel.is_cancelled() {
            return Err(ExecError::Canceled);
        }
        if !policy.is_retryable(&err) || policy.max_retries == 0 {
            return Err(err);
        }
        if attempt >= policy.max_retries {
            return Err(ExecError::RetryExhausted {
                attempts: attempt + 1,
                source: Box::new(err),
            });
        }

        attempt += 1;
        let delay = policy.delay_before(attempt);
        on_retry(RetryNotice {
            attempt,
            delay,
            error: &err,
        });

        tokio::select! {
            _ = cancel.cancelled() => return Err(ExecError::Canceled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn flaky() -> ExecError {
        TaskError::fail("flaky").into()
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries_plus_one() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = retry(&RetryPolicy::new(3), &CancellationToken::new(), |_| {}, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(flaky()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match res {
            Err(ExecError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert_eq!(source.as_label(), "task_failed");
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delays_double_from_the_base() {
        let mut notices = Vec::new();
        let t0 = Instant::now();
        let _: Result<(), _> = retry(
            &RetryPolicy::new(3),
            &CancellationToken::new(),
            |n| notices.push((n.attempt, n.delay)),
            |_| async { Err(flaky()) },
        )
        .await;

        assert_eq!(
            notices,
            vec![
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200)),
                (3, Duration::from_millis(400)),
            ]
        );
        assert_eq!(t0.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_are_not_wrapped() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = retry(&RetryPolicy::new(5), &CancellationToken::new(), |_| {}, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ExecError::from(TaskError::fatal("bad request"))) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(res.unwrap_err().as_label(), "task_fatal");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_returns_the_raw_error() {
        let res: Result<(), _> =
            retry(&RetryPolicy::new(0), &CancellationToken::new(), |_| {}, |_| async { Err(flaky()) }).await;
        assert_eq!(res.unwrap_err().as_label(), "task_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let canceller = token.clone();

        let res: Result<(), _> = retry(
            &RetryPolicy::new(10),
            &token,
            |_| canceller.cancel(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(flaky()) }
            },
        )
        .await;

        assert!(res.unwrap_err().is_canceled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
