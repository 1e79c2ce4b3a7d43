//! # Orchestrator: admission pipeline, observability surface and shutdown.
//!
//! The [`Orchestrator`] owns the event bus, the named gates and the task
//! tracker. `submit` resolves a task's gates, publishes `task:queued` and
//! spawns one driver per task.
//!
//! ## High-level architecture
//! ```text
//! submit(op, opts)
//!   ├─ resolve gates: rate_limits[key], breakers[name] (lazy), groups[group] | global
//!   ├─ JobShared { id, state: Pending, token = runtime_token.child_token() }
//!   ├─ Bus.publish(task:queued)
//!   └─ tracker.spawn(driver::drive(job))  ──► TaskHandle<T>
//!
//! driver::drive(job)
//!   Pipeline: RateLimit ─► Circuit ─► Concurrency ─► Retry ─► Timeout ─► run_attempt
//!   settle terminal state ─► task:succeeded | task:failed | task:cancelled
//!   Bus.off_task(id), Registry.remove(id), complete the handle
//!
//! Event flow:
//!   stages/driver ── publish(Event) ──► Bus ──► listeners (registration order)
//!                                          └──► tap ──► SubscriberSet ──► [queue S1..SN] ──► workers
//!
//! Shutdown path:
//!   runtime_token.cancel()  → every job token
//!   tracker.close(); wait ≤ shutdown_grace
//!     ├─ all drivers finished → Ok
//!     └─ grace exceeded       → RuntimeError::GraceExceeded { stuck }
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use taskgate::{EventKind, OpFn, Orchestrator, OrchestratorConfig, TaskError, TaskOptions};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orch = Orchestrator::builder(OrchestratorConfig::default()).build()?;
//!     orch.on(EventKind::TaskSucceeded, |ev| println!("done: {:?}", ev.name));
//!
//!     let op = OpFn::new("answer", |_ctx: CancellationToken| async { Ok::<_, TaskError>(42) });
//!     let handle = orch.submit(op, TaskOptions::new().with_retries(2))?;
//!     assert_eq!(handle.await?, 42);
//!
//!     orch.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::builder::OrchestratorBuilder;
use super::config::OrchestratorConfig;
use super::driver;
use super::handle::TaskHandle;
use super::registry::Registry;
use crate::clock::Clock;
use crate::control::{CircuitBreaker, ConcurrencyLimiter, RateLimiter};
use crate::error::{BusError, ConfigError, RuntimeError, SubmitError};
use crate::events::{Bus, Event, EventKind, SubscriptionId};
use crate::pipeline::{Captured, Gates, Job, JobShared, Pipeline};
use crate::subscribers::SubscriberSet;
use crate::tasks::{CircuitOptions, Operation, TaskId, TaskOptions, TaskState};

/// Async subscriber fan-out attached to the bus.
pub(super) struct Subscribers {
    pub(super) id: SubscriptionId,
    pub(super) set: Arc<SubscriberSet>,
}

/// Snapshot row of an in-flight task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    /// Task id.
    pub id: TaskId,
    /// Operation name.
    pub name: String,
    /// Lifecycle state when the snapshot was taken.
    pub state: TaskState,
}

/// Task orchestrator.
///
/// Created with [`Orchestrator::builder`]. All methods take `&self`; wrap it in
/// an `Arc` to share it between tasks.
pub struct Orchestrator {
    pub(super) cfg: OrchestratorConfig,
    pub(super) bus: Bus,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) pipeline: Arc<Pipeline>,
    pub(super) rate_limiters: HashMap<String, Arc<RateLimiter>>,
    pub(super) groups: HashMap<String, Arc<ConcurrencyLimiter>>,
    pub(super) global: Option<Arc<ConcurrencyLimiter>>,
    pub(super) breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    pub(super) subscribers: Mutex<Option<Subscribers>>,
    pub(super) registry: Arc<Registry>,
    pub(super) tracker: TaskTracker,
    pub(super) runtime_token: CancellationToken,
}

impl Orchestrator {
    /// Returns a builder for an orchestrator with `cfg`.
    pub fn builder(cfg: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(cfg)
    }

    /// Submits `op` and returns a handle to its outcome.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// - [`SubmitError::Config`] if `opts` names an unknown rate limiter or
    ///   concurrency group, or an invalid breaker threshold;
    /// - [`SubmitError::Closed`] after [`Orchestrator::shutdown`].
    pub fn submit<O: Operation>(
        &self,
        op: O,
        mut opts: TaskOptions,
    ) -> Result<TaskHandle<O::Output>, SubmitError> {
        if self.runtime_token.is_cancelled() || self.tracker.is_closed() {
            return Err(SubmitError::Closed);
        }
        let gates = self.resolve(&opts)?;

        let shared = Arc::new(JobShared::new(
            Arc::from(op.name()),
            self.runtime_token.child_token(),
            self.clock.as_ref(),
        ));
        let listeners = opts.take_listeners();
        let body = Arc::new(Captured::new(op));
        let job = Job {
            shared: Arc::clone(&shared),
            body: body.clone(),
            opts,
            gates,
            bus: self.bus.clone(),
            clock: Arc::clone(&self.clock),
            cancel_grace: self.cfg.cancel_grace,
        };

        self.registry.insert(&shared);
        for (kind, listener) in listeners {
            self.bus.on_task(shared.id, kind, move |ev| listener(ev));
        }
        debug!(task = %shared.id, name = %shared.name, "task queued");
        self.bus.publish(job.event(EventKind::TaskQueued));

        let (tx, rx) = oneshot::channel();
        self.tracker.spawn(driver::drive(
            job,
            body,
            Arc::clone(&self.pipeline),
            Arc::clone(&self.registry),
            tx,
        ));

        Ok(TaskHandle::new(shared, self.bus.clone(), rx))
    }

    /// Registers a global listener for `kind`.
    pub fn on<F>(&self, kind: EventKind, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.on(kind, f)
    }

    /// Registers a listener for the next `kind` event only.
    pub fn once<F>(&self, kind: EventKind, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.once(kind, f)
    }

    /// Registers a listener for every event.
    pub fn tap<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.tap(f)
    }

    /// Registers a listener by event name; unknown names are application events.
    pub fn on_name<F>(&self, name: &str, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.on_name(name, f)
    }

    /// Removes a listener.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus.off(id)
    }

    /// Emits a user event on the orchestrator's bus.
    ///
    /// # Errors
    /// [`BusError::UnhandledError`] for an unhandled `error` event.
    pub fn emit(&self, ev: Event) -> Result<usize, BusError> {
        self.bus.emit(ev)
    }

    /// Emits the event called `name` with an application payload.
    ///
    /// # Errors
    /// [`BusError::UnhandledError`] for an unhandled `error` event.
    pub fn emit_named<T>(&self, name: &str, payload: T) -> Result<usize, BusError>
    where
        T: std::any::Any + Send + Sync,
    {
        self.bus.emit_named(name, payload)
    }

    /// The orchestrator's event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The configuration the orchestrator was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.cfg
    }

    /// Named rate limiter, if configured.
    pub fn rate_limiter(&self, key: &str) -> Option<Arc<RateLimiter>> {
        self.rate_limiters.get(key).cloned()
    }

    /// Named circuit breaker, if a task has created it.
    pub fn circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers().get(name).cloned()
    }

    /// Worker pool of a concurrency group; `None` selects the orchestrator-wide pool.
    pub fn concurrency(&self, group: Option<&str>) -> Option<Arc<ConcurrencyLimiter>> {
        match group {
            Some(g) => self.groups.get(g).cloned(),
            None => self.global.clone(),
        }
    }

    /// Number of tasks that have not reached a terminal state.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// In-flight tasks, sorted by name.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.registry
            .list()
            .into_iter()
            .map(|row| TaskInfo {
                id: row.id,
                name: row.name,
                state: row.state,
            })
            .collect()
    }

    /// Cancels every in-flight task and waits up to `shutdown_grace` for them.
    ///
    /// Further submissions fail with [`SubmitError::Closed`].
    ///
    /// # Errors
    /// [`RuntimeError::GraceExceeded`] with the names of tasks still running.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let grace = self.cfg.shutdown_grace;
        let cancelled = self.registry.cancel_all();
        self.runtime_token.cancel();
        self.tracker.close();
        info!(cancelled, grace_ms = grace.as_millis() as u64, "orchestrator shutting down");

        let res = match time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => Ok(()),
            Err(_elapsed) => {
                let stuck: Vec<String> = self.registry.list().into_iter().map(|r| r.name).collect();
                warn!(?stuck, "shutdown grace exceeded");
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };

        self.close_subscribers().await;
        res
    }

    fn resolve(&self, opts: &TaskOptions) -> Result<Gates, ConfigError> {
        let rate = opts
            .rate_limiter()
            .map(|key| {
                self.rate_limiters
                    .get(key)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownRateLimiter(key.to_string()))
            })
            .transpose()?;

        let slots = match opts.concurrency_group() {
            Some(group) => Some(
                self.groups
                    .get(group)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownConcurrencyGroup(group.to_string()))?,
            ),
            None => self.global.clone(),
        };

        let circuit = opts
            .circuit_breaker()
            .map(|c| self.breaker_for(c))
            .transpose()?;

        Ok(Gates {
            rate,
            circuit,
            slots,
        })
    }

    /// Returns the breaker named in `opts`, creating it on first use.
    fn breaker_for(&self, opts: &CircuitOptions) -> Result<Arc<CircuitBreaker>, ConfigError> {
        opts.config.validate(&opts.name)?;

        let mut breakers = self.breakers();
        if let Some(existing) = breakers.get(&*opts.name) {
            return Ok(Arc::clone(existing));
        }
        let breaker = Arc::new(
            CircuitBreaker::with_clock(&*opts.name, opts.config, Arc::clone(&self.clock))?
                .with_bus(self.bus.clone()),
        );
        breakers.insert(opts.name.to_string(), Arc::clone(&breaker));
        debug!(breaker = %opts.name, "circuit breaker created");
        Ok(breaker)
    }

    async fn close_subscribers(&self) {
        let Some(Subscribers { id, set }) = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        self.bus.off(id);
        match Arc::try_unwrap(set) {
            Ok(set) => set.shutdown().await,
            Err(_shared) => debug!("subscriber set still referenced; workers stop when it drops"),
        }
    }

    fn breakers(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("in_flight", &self.registry.len())
            .field("closed", &self.tracker.is_closed())
            .finish()
    }
}
