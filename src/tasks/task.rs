//! # Operation abstraction.
//!
//! An [`Operation`] is the opaque body the orchestrator guards. It receives a
//! [`CancellationToken`] per attempt and should check it to stop cooperatively;
//! the orchestrator never aborts a body that is still running except by dropping
//! it after a deadline.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// # Asynchronous, cancelable unit of work.
///
/// `execute` is called once per attempt, so it must be re-runnable. `cancel` is an
/// optional capability invoked when the task is cancelled or an attempt times out,
/// in addition to the token being cancelled.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use async_trait::async_trait;
/// use taskgate::{Operation, TaskError};
///
/// struct Fetch;
///
/// #[async_trait]
/// impl Operation for Fetch {
///     type Output = u32;
///
///     fn name(&self) -> &str { "fetch" }
///
///     async fn execute(&self, ctx: CancellationToken) -> Result<u32, TaskError> {
///         if ctx.is_cancelled() {
///             return Err(TaskError::Canceled);
///         }
///         Ok(42)
///     }
/// }
/// ```
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    /// Value produced on success.
    type Output: Send + 'static;

    /// Returns a stable, human-readable name (used in events and logs).
    fn name(&self) -> &str;

    /// Runs one attempt.
    async fn execute(&self, ctx: CancellationToken) -> Result<Self::Output, TaskError>;

    /// Called when the running attempt is asked to stop. Default: no-op.
    fn cancel(&self) {}
}
