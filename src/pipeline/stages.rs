//! The five standard admission stages.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Job, Next, Stage};
use crate::control::{Overflow, RetryNotice, retry, with_timeout};
use crate::error::ExecError;
use crate::events::EventKind;
use crate::tasks::TaskState;

/// Waits for (or is refused) a slot in the task's rate window.
pub(super) struct RateLimitStage;

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn admit(&self, job: &Job, ctx: &CancellationToken, next: Next<'_>) -> Result<(), ExecError> {
        let Some(limiter) = &job.gates.rate else {
            return next.run(job, ctx).await;
        };

        if let Err(delay) = limiter.try_admit() {
            job.bus.publish(
                job.event(EventKind::RateLimited)
                    .with_name(limiter.key())
                    .with_delay(delay),
            );
            match limiter.config().overflow {
                Overflow::Reject => return Err(ExecError::RateLimited { retry_after: delay }),
                Overflow::Wait => limiter.admit(ctx).await?,
            }
        }
        next.run(job, ctx).await
    }
}

/// Fails fast while the task's breaker is open and records the final outcome.
pub(super) struct CircuitStage;

#[async_trait]
impl Stage for CircuitStage {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    async fn admit(&self, job: &Job, ctx: &CancellationToken, next: Next<'_>) -> Result<(), ExecError> {
        let Some(breaker) = &job.gates.circuit else {
            return next.run(job, ctx).await;
        };

        let permit = breaker.try_acquire()?;
        let res = next.run(job, ctx).await;
        permit.settle(&res);
        res
    }
}

/// Holds a worker slot for the rest of the chain; the job is `Admitted` once it has one.
pub(super) struct ConcurrencyStage;

#[async_trait]
impl Stage for ConcurrencyStage {
    fn name(&self) -> &'static str {
        "concurrency"
    }

    async fn admit(&self, job: &Job, ctx: &CancellationToken, next: Next<'_>) -> Result<(), ExecError> {
        let _slot = match &job.gates.slots {
            Some(pool) => Some(pool.acquire(ctx).await?),
            None => None,
        };
        job.shared.advance(TaskState::Admitted);
        next.run(job, ctx).await
    }
}

/// Re-runs the rest of the chain per the task's retry policy.
pub(super) struct RetryStage;

#[async_trait]
impl Stage for RetryStage {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn admit(&self, job: &Job, ctx: &CancellationToken, next: Next<'_>) -> Result<(), ExecError> {
        retry(
            job.opts.retry(),
            ctx,
            |notice| announce_retry(job, notice),
            move |_| next.run(job, ctx),
        )
        .await
    }
}

fn announce_retry(job: &Job, notice: RetryNotice<'_>) {
    job.shared.set_attempt(notice.attempt);
    job.shared.advance(TaskState::Retrying);
    debug!(
        task = %job.shared.id,
        name = %job.shared.name,
        attempt = notice.attempt,
        delay_ms = notice.delay.as_millis() as u64,
        error = %notice.error,
        "retry scheduled"
    );
    job.bus.publish(
        job.event(EventKind::TaskRetry)
            .with_attempt(notice.attempt)
            .with_delay(notice.delay)
            .with_reason(notice.error.to_string()),
    );
}

/// Races each attempt against the task's deadline.
pub(super) struct TimeoutStage;

#[async_trait]
impl Stage for TimeoutStage {
    fn name(&self) -> &'static str {
        "timeout"
    }

    async fn admit(&self, job: &Job, ctx: &CancellationToken, next: Next<'_>) -> Result<(), ExecError> {
        let Some(timeout) = job.opts.timeout() else {
            return next.run(job, ctx).await;
        };

        let res = with_timeout(timeout, ctx, |child| async move { next.run(job, &child).await }).await;
        if let Err(ExecError::Timeout { timeout }) = &res {
            job.body.cancel();
            warn!(
                task = %job.shared.id,
                name = %job.shared.name,
                attempt = job.shared.attempt(),
                timeout_ms = timeout.as_millis() as u64,
                "attempt timed out"
            );
            job.bus.publish(
                job.event(EventKind::TaskTimeout)
                    .with_attempt(job.shared.attempt())
                    .with_timeout(*timeout),
            );
        }
        res
    }
}
