//! # Caller-side handle of a submitted task.
//!
//! [`TaskHandle`] resolves to the task's value or a [`TaskFailure`]. It also
//! exposes the live state, the retry counter and latency bookkeeping, and lets
//! the caller cancel the task or listen to its events.

use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{oneshot, watch};

use super::driver::Outcome;
use crate::error::{ExecError, TaskFailure};
use crate::events::{Bus, Event, EventKind, SubscriptionId};
use crate::pipeline::JobShared;
use crate::tasks::{TaskId, TaskState, TaskTimings};

/// Result handle returned by [`Orchestrator::submit`](crate::Orchestrator::submit).
///
/// Awaiting the handle (or calling [`TaskHandle::wait`]) yields the outcome.
/// Dropping it does not cancel the task.
pub struct TaskHandle<T> {
    shared: Arc<JobShared>,
    bus: Bus,
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(shared: Arc<JobShared>, bus: Bus, rx: oneshot::Receiver<Outcome<T>>) -> Self {
        Self { shared, bus, rx }
    }

    /// Task id.
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// Operation name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<TaskState> {
        self.shared.subscribe_state()
    }

    /// Retries performed so far (`0` during the first attempt).
    pub fn attempt(&self) -> u32 {
        self.shared.attempt()
    }

    /// Submission, first start and completion instants.
    pub fn timings(&self) -> TaskTimings {
        self.shared.timings()
    }

    /// Requests cancellation. Returns `true` only for the first call on a task
    /// that has not finished yet.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Detached canceller, usable after the handle was moved into `wait`.
    pub fn canceller(&self) -> TaskCanceller {
        TaskCanceller {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Listens to `kind` events of this task only.
    ///
    /// The listener is removed when the task finishes. Events published before
    /// the call are not replayed: `task:queued` is always published before
    /// `submit` returns, and on a multi-thread runtime the first attempt may
    /// already be running. Register with [`TaskOptions::with_listener`] to see
    /// every event of the task.
    ///
    /// [`TaskOptions::with_listener`]: crate::TaskOptions::with_listener
    pub fn on<F>(&self, kind: EventKind, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.on_task(self.shared.id, kind, f)
    }

    /// Waits for the outcome.
    ///
    /// # Errors
    /// [`TaskFailure`] with the id, retry counter and the final [`ExecError`].
    pub async fn wait(self) -> Result<T, TaskFailure> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_dropped) => Err(TaskFailure {
                id: self.shared.id,
                attempt: self.shared.attempt(),
                error: ExecError::Canceled,
            }),
        }
    }
}

impl<T: Send + 'static> IntoFuture for TaskHandle<T> {
    type Output = Result<T, TaskFailure>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("state", &self.shared.state())
            .finish()
    }
}

/// Cancels one task; cheap to clone.
#[derive(Clone)]
pub struct TaskCanceller {
    shared: Arc<JobShared>,
}

impl TaskCanceller {
    /// Requests cancellation. Returns `true` only for the first call, across
    /// the handle and all its cancellers, on a task that has not finished yet.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Id of the task this canceller targets.
    pub fn id(&self) -> TaskId {
        self.shared.id
    }
}

impl fmt::Debug for TaskCanceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCanceller")
            .field("id", &self.shared.id)
            .finish()
    }
}
