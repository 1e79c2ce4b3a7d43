//! # Async event subscribers.
//!
//! Bus listeners run inline on the emitting task. Subscribers are for handlers
//! that should not: each gets its own queue and worker.
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   stages/driver ── publish(Event) ──► Bus ──► tap ──► SubscriberSet::emit(&Event)
//!                                                            │
//!                                                   ┌────────┴────────┬─────────┐
//!                                                   ▼                 ▼         ▼
//!                                               LogWriter          Metrics   Custom ...
//! ```
//!
//! ## Contents
//! - [`Subscribe`] the subscriber trait
//! - [`SubscriberSet`] bounded per-subscriber fan-out
//! - [`LogWriter`] maps events to `tracing` records

mod log;
mod set;
mod subscribe;

pub use log::{LogWriter, log_event, message_for};
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
