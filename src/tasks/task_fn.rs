//! # Closure-backed operation (`OpFn`)
//!
//! [`OpFn`] wraps a closure `F: Fn(CancellationToken) -> Fut`, producing a fresh
//! future per attempt. Nothing is shared between attempts unless the closure
//! captures it explicitly (e.g. an `Arc<AtomicU32>` counter).
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use taskgate::{OpFn, Operation, TaskError};
//!
//! let op = OpFn::new("answer", |_ctx: CancellationToken| async move {
//!     Ok::<_, TaskError>(42)
//! });
//! assert_eq!(op.name(), "answer");
//! ```

use std::borrow::Cow;
use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::tasks::task::Operation;

/// Function-backed operation.
pub struct OpFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> OpFn<F> {
    /// Creates a new function-backed operation.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> std::fmt::Debug for OpFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpFn").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut, T> Operation for OpFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: CancellationToken) -> Result<T, TaskError> {
        (self.f)(ctx).await
    }
}
