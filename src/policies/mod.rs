//! Retry policies.
//!
//! This module groups the knobs that control **whether** a failed attempt is
//! retried and **how long** to wait before the next one.
//!
//! ## Contents
//! - [`RetryPolicy`]   max retries + retry predicate + backoff
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid thundering herd
//!
//! ## Quick wiring
//! ```text
//! TaskOptions { retry: RetryPolicy { max_retries, backoff, retryable }, .. }
//!      └─► pipeline::stages::RetryStage runs control::retry() with it:
//!           - retryable(err) decides continue/propagate
//!           - backoff.next(n) gives the sleep before retry n+1
//! ```
//!
//! ## Defaults
//! - `RetryPolicy::default()` → max_retries=0 (single attempt), default predicate.
//! - `BackoffPolicy::default()` → first=100ms, factor=2.0, max=30s, jitter=None.

mod backoff;
mod jitter;
mod retry;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry::{RetryPolicy, RetryPredicate};
