//! # Admission pipeline.
//!
//! Every submission runs through an ordered list of [`Stage`]s built once when
//! the orchestrator is constructed. A stage may delay the job, reject it, or
//! wrap the rest of the chain (retry, timeout, breaker bookkeeping):
//!
//! ```text
//! RateLimitStage ─► CircuitStage ─► ConcurrencyStage ─► RetryStage ─► TimeoutStage ─► run_attempt
//!   (wait/reject)    (permit,          (slot, Pending     (loop over     (deadline per    (Running,
//!                     outcome)          → Admitted)        the rest)      attempt)         task:started)
//! ```
//!
//! [`Next`] is a cursor over the remaining stages; calling [`Next::run`] past the
//! last stage invokes the terminal [`run_attempt`](crate::core::runner::run_attempt).

mod job;
mod stages;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::core::runner;
use crate::error::ExecError;

pub(crate) use job::{Captured, Gates, Job, JobShared, Runnable};
use stages::{ConcurrencyStage, CircuitStage, RateLimitStage, RetryStage, TimeoutStage};

/// One link of the admission chain.
#[async_trait]
pub(crate) trait Stage: Send + Sync + 'static {
    /// Stable name for logs.
    fn name(&self) -> &'static str;

    /// Admits `job` and hands it to `next`, or returns why it stops here.
    async fn admit(
        &self,
        job: &Job,
        ctx: &CancellationToken,
        next: Next<'_>,
    ) -> Result<(), ExecError>;
}

/// Cursor over the stages that have not run yet.
#[derive(Clone, Copy)]
pub(crate) struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
}

impl<'a> Next<'a> {
    /// Runs the rest of the chain, ending in one attempt of the job's body.
    pub(crate) fn run(
        self,
        job: &'a Job,
        ctx: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        match self.stages.split_first() {
            Some((head, rest)) => head.admit(job, ctx, Next { stages: rest }),
            None => Box::pin(runner::run_attempt(job, ctx)),
        }
    }
}

/// Ordered stage list shared by all jobs of one orchestrator.
pub(crate) struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Rate limit → circuit breaker → concurrency → retry → timeout.
    pub(crate) fn standard() -> Self {
        Self {
            stages: vec![
                Arc::new(RateLimitStage),
                Arc::new(CircuitStage),
                Arc::new(ConcurrencyStage),
                Arc::new(RetryStage),
                Arc::new(TimeoutStage),
            ],
        }
    }

    /// Stage names in admission order.
    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs `job` through every stage on the job's own token.
    pub(crate) async fn run(&self, job: &Job) -> Result<(), ExecError> {
        let ctx = job.shared.token.clone();
        Next {
            stages: &self.stages,
        }
        .run(job, &ctx)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_order_matches_admission_order() {
        assert_eq!(
            Pipeline::standard().names(),
            vec!["rate_limit", "circuit_breaker", "concurrency", "retry", "timeout"]
        );
    }
}
