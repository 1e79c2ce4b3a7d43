//! # Per-task driver.
//!
//! One driver future per submission, spawned on the orchestrator's task
//! tracker. It runs the job through the pipeline, settles the terminal state,
//! publishes the terminal event and completes the caller's handle.
//!
//! ## Terminal mapping
//! ```text
//! job token cancelled / Err(Canceled) ─► Cancelled  task:cancelled
//! Ok(value)                           ─► Succeeded  task:succeeded
//! Err(timeout of the last attempt)    ─► TimedOut   task:failed
//! Err(anything else)                  ─► Failed     task:failed
//! ```
//!
//! ## Rules
//! - A cancelled job never reports `Succeeded`, even if its body returned a value.
//! - Task-scoped listeners are removed after the terminal event.
//! - The handle may have been dropped; the outcome is then discarded.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::registry::Registry;
use crate::error::{ExecError, TaskError, TaskFailure};
use crate::events::EventKind;
use crate::pipeline::{Captured, Job, Pipeline};
use crate::tasks::{Operation, TaskState};

pub(crate) type Outcome<T> = Result<T, TaskFailure>;

/// Drives `job` to completion and reports its outcome through `tx`.
pub(crate) async fn drive<O: Operation>(
    job: Job,
    body: Arc<Captured<O>>,
    pipeline: Arc<Pipeline>,
    registry: Arc<Registry>,
    tx: oneshot::Sender<Outcome<O::Output>>,
) {
    let res = match pipeline.run(&job).await {
        Ok(()) => body
            .take()
            .ok_or_else(|| TaskError::fatal("operation completed without output").into()),
        Err(e) => Err(e),
    };

    let outcome = settle(&job, res);
    job.bus.off_task(job.shared.id);
    registry.remove(job.shared.id);

    if tx.send(outcome).is_err() {
        debug!(task = %job.shared.id, "handle dropped before completion");
    }
}

fn settle<T>(job: &Job, res: Result<T, ExecError>) -> Outcome<T> {
    let shared = &job.shared;
    let elapsed = shared.mark_completed(job.clock.as_ref());
    let attempt = shared.attempt();

    let res = if shared.token.is_cancelled() {
        Err(ExecError::Canceled)
    } else {
        res
    };

    match res {
        Ok(value) => {
            shared.advance(TaskState::Succeeded);
            debug!(task = %shared.id, name = %shared.name, attempt, "task succeeded");
            job.bus.publish(
                job.event(EventKind::TaskSucceeded)
                    .with_attempt(attempt)
                    .with_elapsed(elapsed),
            );
            Ok(value)
        }
        Err(error) if error.is_canceled() => {
            shared.advance(TaskState::Cancelled);
            info!(task = %shared.id, name = %shared.name, attempt, "task cancelled");
            job.bus.publish(
                job.event(EventKind::TaskCancelled)
                    .with_attempt(attempt)
                    .with_elapsed(elapsed),
            );
            Err(TaskFailure {
                id: shared.id,
                attempt,
                error,
            })
        }
        Err(error) => {
            let state = if error.is_timeout() {
                TaskState::TimedOut
            } else {
                TaskState::Failed
            };
            shared.advance(state);
            warn!(
                task = %shared.id,
                name = %shared.name,
                attempt,
                state = %state,
                error = %error,
                "task failed"
            );
            job.bus.publish(
                job.event(EventKind::TaskFailed)
                    .with_attempt(attempt)
                    .with_elapsed(elapsed)
                    .with_reason(error.to_string()),
            );
            Err(TaskFailure {
                id: shared.id,
                attempt,
                error,
            })
        }
    }
}
