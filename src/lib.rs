//! # taskgate
//!
//! **Taskgate** runs async operations behind a chain of admission gates: a
//! sliding-window rate limiter, a named circuit breaker, a bounded concurrency
//! pool, retry with exponential backoff and a per-attempt deadline. Every
//! transition is published on a synchronous event bus.
//!
//! The gates are also usable on their own (see [`RateLimiter`],
//! [`CircuitBreaker`], [`ConcurrencyLimiter`], [`retry`], [`with_timeout`]).
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   submit(op, TaskOptions)      submit(...)           submit(...)
//!            │                      │                     │
//!            ▼                      ▼                     ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Orchestrator                                                     │
//! │  - Bus (ordered listeners, once, tap, task-scoped listeners)      │
//! │  - rate limiters (by key), breakers (by name, lazy)               │
//! │  - concurrency pools (global + groups)                            │
//! │  - Registry (in-flight tasks), TaskTracker (drivers)              │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐
//!   │  driver  │       │  driver  │       │  driver  │ ──► TaskHandle<T>
//!   └────┬─────┘       └────┬─────┘       └────┬─────┘
//!        │ RateLimit ─► Circuit ─► Concurrency ─► Retry ─► Timeout ─► attempt
//!        │
//!        │ publishes: task:queued, task:started, task:retry, task:timeout,
//!        │            task:succeeded | task:failed | task:cancelled,
//!        │            rate:limited, circuit:open | half_open | closed
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Bus (synchronous dispatch)                    │
//! └───────────┬────────────────────────────────────────┬──────────────┘
//!             ▼                                        ▼
//!     user listeners                         tap ──► SubscriberSet
//!  (registration order)                          ┌────────┼────────┐
//!                                                ▼        ▼        ▼
//!                                             worker1  worker2  workerN
//! ```
//!
//! ### Lifecycle
//! ```text
//! Pending ──► Admitted ──► Running ──┬──► Succeeded
//!    │            │           │      ├──► Failed
//!    │            │           ▼      ├──► TimedOut
//!    │            │        Retrying ─┘
//!    └────────────┴───────────┴──────────► Cancelled
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                          |
//! |-------------------|----------------------------------------------------------|---------------------------------------------|
//! | **Orchestration** | Submit operations, await or cancel them, shut down.      | [`Orchestrator`], [`TaskHandle`]            |
//! | **Gates**         | Rate windows, breakers, slots, retry, deadlines.         | [`RateLimiter`], [`CircuitBreaker`], ...    |
//! | **Events**        | Ordered listeners, one-shot listeners, wildcard taps.    | [`Bus`], [`Event`], [`EventKind`]           |
//! | **Subscribers**   | Async handlers with their own queues.                    | [`Subscribe`], [`LogWriter`]                |
//! | **Policies**      | Retry budget, predicate and backoff.                     | [`RetryPolicy`], [`BackoffPolicy`]          |
//! | **Errors**        | Typed errors with stable labels.                         | [`ExecError`], [`TaskFailure`]              |
//! | **Configuration** | Orchestrator-wide limits and defaults.                   | [`OrchestratorConfig`]                      |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use taskgate::{
//!     CircuitBreakerConfig, OpFn, Orchestrator, OrchestratorConfig, RateLimitConfig,
//!     TaskError, TaskOptions,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = OrchestratorConfig::default();
//!     cfg.max_concurrent = Some(4);
//!     cfg.rate_limits.insert("api".into(), RateLimitConfig::new(10, Duration::from_secs(1)));
//!
//!     let orch = Orchestrator::builder(cfg).build()?;
//!
//!     let fetch = OpFn::new("fetch", |ctx: CancellationToken| async move {
//!         if ctx.is_cancelled() {
//!             return Err(TaskError::Canceled);
//!         }
//!         Ok::<_, TaskError>("payload")
//!     });
//!
//!     let opts = TaskOptions::new()
//!         .with_rate_limiter("api")
//!         .with_circuit_breaker("upstream", CircuitBreakerConfig::default())
//!         .with_retries(2)
//!         .with_timeout(Duration::from_secs(5));
//!
//!     let body = orch.submit(fetch, opts)?.await?;
//!     assert_eq!(body, "payload");
//!
//!     orch.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod clock;
mod control;
mod core;
mod error;
mod events;
mod pipeline;
mod policies;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use clock::{Clock, ManualClock, TokioClock};
pub use control::{
    CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitSnapshot, CircuitState,
    ConcurrencyLimiter, Overflow, RateLimitConfig, RateLimiter, RetryNotice, SlotPermit, retry,
    with_timeout,
};
pub use self::core::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, TaskCanceller, TaskHandle, TaskInfo,
};
pub use error::{
    BusError, ConfigError, ExecError, RuntimeError, SubmitError, TaskError, TaskFailure,
};
pub use events::{
    Bus, DEFAULT_MAX_LISTENERS, Event, EventKind, Listener, Payload, SubscriptionId, UnknownEvent,
};
pub use policies::{BackoffPolicy, JitterPolicy, RetryPolicy, RetryPredicate};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet, log_event, message_for};
pub use tasks::{CircuitOptions, OpFn, Operation, TaskId, TaskOptions, TaskState, TaskTimings};
