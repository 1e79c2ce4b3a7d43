//! # In-flight task record.
//!
//! [`Job`] is what the admission stages see: the type-erased body, the task
//! options, the gates resolved at submission and the shared [`JobShared`] state
//! that the caller's `TaskHandle` observes.
//!
//! The body is erased behind [`Runnable`]; [`Captured`] adapts a typed
//! [`Operation`] by parking its output until the driver collects it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::control::{CircuitBreaker, ConcurrencyLimiter, RateLimiter};
use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::tasks::{Operation, TaskId, TaskOptions, TaskState, TaskTimings};

/// Type-erased task body.
#[async_trait]
pub(crate) trait Runnable: Send + Sync + 'static {
    /// Runs one attempt; the value (if any) stays inside the body.
    async fn run_attempt(&self, ctx: CancellationToken) -> Result<(), TaskError>;

    fn cancel(&self);
}

/// Typed operation plus a slot for its last output.
pub(crate) struct Captured<O: Operation> {
    op: O,
    out: Mutex<Option<O::Output>>,
}

impl<O: Operation> Captured<O> {
    pub(crate) fn new(op: O) -> Self {
        Self {
            op,
            out: Mutex::new(None),
        }
    }

    pub(crate) fn take(&self) -> Option<O::Output> {
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait]
impl<O: Operation> Runnable for Captured<O> {
    async fn run_attempt(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        let value = self.op.execute(ctx).await?;
        *self.out.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        Ok(())
    }

    fn cancel(&self) {
        self.op.cancel();
    }
}

/// State shared between the driver and the caller's handle.
pub(crate) struct JobShared {
    pub(crate) id: TaskId,
    pub(crate) name: Arc<str>,
    pub(crate) token: CancellationToken,
    state: watch::Sender<TaskState>,
    attempt: AtomicU32,
    timings: Mutex<TaskTimings>,
    cancel_requested: AtomicBool,
}

impl JobShared {
    pub(crate) fn new(name: Arc<str>, token: CancellationToken, clock: &dyn Clock) -> Self {
        let (state, _) = watch::channel(TaskState::Pending);
        Self {
            id: TaskId::new(),
            name,
            token,
            state,
            attempt: AtomicU32::new(0),
            timings: Mutex::new(TaskTimings::new(clock.now())),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Moves to `next` if the transition is legal. Returns whether it moved.
    pub(crate) fn advance(&self, next: TaskState) -> bool {
        self.state.send_if_modified(|cur| {
            if cur.can_advance_to(next) {
                *cur = next;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Acquire)
    }

    pub(crate) fn set_attempt(&self, n: u32) {
        self.attempt.store(n, Ordering::Release);
    }

    pub(crate) fn timings(&self) -> TaskTimings {
        *self.lock_timings()
    }

    pub(crate) fn mark_started(&self, clock: &dyn Clock) {
        let mut t = self.lock_timings();
        if t.started_at.is_none() {
            t.started_at = Some(clock.now());
        }
    }

    pub(crate) fn mark_completed(&self, clock: &dyn Clock) -> Duration {
        let mut t = self.lock_timings();
        let now = clock.now();
        t.completed_at = Some(now);
        now.saturating_duration_since(t.enqueued_at)
    }

    /// Cancels the task token. Only the first call on an unfinished task returns `true`.
    pub(crate) fn cancel(&self) -> bool {
        if self.state().is_terminal() || self.cancel_requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    fn lock_timings(&self) -> MutexGuard<'_, TaskTimings> {
        self.timings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Gates a job was routed through, resolved once at submission.
#[derive(Default)]
pub(crate) struct Gates {
    pub(crate) rate: Option<Arc<RateLimiter>>,
    pub(crate) circuit: Option<Arc<CircuitBreaker>>,
    pub(crate) slots: Option<Arc<ConcurrencyLimiter>>,
}

/// One submission moving through the pipeline.
pub(crate) struct Job {
    pub(crate) shared: Arc<JobShared>,
    pub(crate) body: Arc<dyn Runnable>,
    pub(crate) opts: TaskOptions,
    pub(crate) gates: Gates,
    pub(crate) bus: Bus,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cancel_grace: Duration,
}

impl Job {
    /// Event about this job, with id and name filled in.
    pub(crate) fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_task(self.shared.id)
            .with_name(Arc::clone(&self.shared.name))
    }
}
