//! # Deadline race.
//!
//! [`with_timeout`] runs an operation on a child of the caller's token and
//! races it against a timer. On expiry the child token is cancelled and the
//! operation future is dropped; the caller's token is untouched.

use std::future::Future;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;

/// Runs `f(child_token)` with a deadline. `Duration::ZERO` disables it.
///
/// # Errors
/// [`ExecError::Timeout`] if the operation does not settle in time, otherwise
/// whatever it returns.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use taskgate::{with_timeout, ExecError};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let res: Result<(), _> = with_timeout(Duration::from_millis(10), &CancellationToken::new(), |ctx| async move {
///     ctx.cancelled().await;
///     Err(ExecError::Canceled)
/// })
/// .await;
/// assert!(res.unwrap_err().is_timeout());
/// # }
/// ```
pub async fn with_timeout<F, Fut, T>(
    timeout: Duration,
    cancel: &CancellationToken,
    f: F,
) -> Result<T, ExecError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ExecError>>,
{
    let child = cancel.child_token();
    if timeout.is_zero() {
        return f(child).await;
    }

    match time::timeout(timeout, f(child.clone())).await {
        Ok(res) => res,
        Err(_elapsed) => {
            child.cancel();
            Err(ExecError::Timeout { timeout })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn expiry_cancels_the_child_only() {
        let parent = CancellationToken::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&seen);

        let res: Result<(), _> = with_timeout(Duration::from_millis(50), &parent, |ctx| {
            *slot.lock().unwrap() = Some(ctx.clone());
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(res, Err(ExecError::Timeout { timeout }) if timeout == Duration::from_millis(50)));
        assert!(seen.lock().unwrap().as_ref().unwrap().is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_means_no_deadline() {
        let res = with_timeout(Duration::ZERO, &CancellationToken::new(), |_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, ExecError>("done")
        })
        .await;
        assert_eq!(res.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn fast_operations_pass_through() {
        let finished = AtomicBool::new(false);
        let res = with_timeout(Duration::from_secs(1), &CancellationToken::new(), |_| async {
            finished.store(true, Ordering::SeqCst);
            Ok::<_, ExecError>(5)
        })
        .await;
        assert_eq!(res.unwrap(), 5);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancel_reaches_the_operation() {
        let parent = CancellationToken::new();
        parent.cancel();
        let res: Result<(), _> = with_timeout(Duration::from_secs(1), &parent, |ctx| async move {
            ctx.cancelled().await;
            Err(ExecError::Canceled)
        })
        .await;
        assert!(res.unwrap_err().is_canceled());
    }
}
