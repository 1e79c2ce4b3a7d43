//! # Run a single attempt of a job's body.
//!
//! The terminal link of the admission pipeline.
//!
//! ```text
//! advance(Running) → task:started{attempt} → body.run_attempt(ctx)
//!                                              │
//!            job token cancelled ──────────────┤
//!                 │                            ▼
//!                 ▼                       Ok / Err(e)
//!   body.cancel(), wait ≤ cancel_grace
//!   → Err(Canceled)
//! ```
//!
//! ## Rules
//! - `ctx` is the attempt's token (a child of the job token when a deadline applies).
//! - The body gets `cancel_grace` to observe cancellation and return; after that it
//!   is dropped and the attempt reports `Canceled` anyway.

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ExecError;
use crate::events::EventKind;
use crate::pipeline::Job;
use crate::tasks::TaskState;

/// Executes one attempt of `job`, publishing `task:started`.
pub(crate) async fn run_attempt(job: &Job, ctx: &CancellationToken) -> Result<(), ExecError> {
    let attempt = job.shared.attempt();
    job.shared.advance(TaskState::Running);
    job.shared.mark_started(job.clock.as_ref());

    debug!(task = %job.shared.id, name = %job.shared.name, attempt, "attempt started");
    job.bus
        .publish(job.event(EventKind::TaskStarted).with_attempt(attempt));

    let body = job.body.run_attempt(ctx.clone());
    tokio::pin!(body);

    tokio::select! {
        res = &mut body => res.map_err(ExecError::from),
        _ = job.shared.token.cancelled() => {
            job.body.cancel();
            if !job.cancel_grace.is_zero() && time::timeout(job.cancel_grace, &mut body).await.is_err() {
                debug!(
                    task = %job.shared.id,
                    grace_ms = job.cancel_grace.as_millis() as u64,
                    "body ignored cancellation past grace, dropping it"
                );
            }
            Err(ExecError::Canceled)
        }
    }
}
