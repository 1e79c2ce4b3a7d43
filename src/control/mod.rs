//! # Execution gates.
//!
//! Standalone building blocks the orchestrator chains into its admission
//! pipeline. Each is usable on its own:
//!
//! - [`RateLimiter`] sliding-window admission (`try_admit` / `admit`)
//! - [`CircuitBreaker`] failure-rate gate (`try_acquire` / `fire`)
//! - [`ConcurrencyLimiter`] FIFO worker slots (`acquire` / `run`)
//! - [`retry`] exponential-backoff re-execution
//! - [`with_timeout`] deadline race on a child cancellation token

mod circuit;
mod concurrency;
mod rate;
mod retry;
mod timeout;

pub use circuit::{
    CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitSnapshot, CircuitState,
};
pub use concurrency::{ConcurrencyLimiter, SlotPermit};
pub use rate::{Overflow, RateLimitConfig, RateLimiter};
pub use retry::{RetryNotice, retry};
pub use timeout::with_timeout;
