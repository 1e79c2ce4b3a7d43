//! Runtime events: types and the synchronous bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event names and payload fields
//! - [`Bus`] ordered listener table with `on`/`once`/`off`/`tap`/`emit`, plus
//!   string-named `on_name`/`emit_named` for application events
//!
//! ## Quick reference
//! - **Publishers**: `Orchestrator::submit`, the admission stages, the task
//!   driver, circuit breakers.
//! - **Consumers**: user listeners, task-scoped listeners from
//!   `TaskHandle::on`, and the `SubscriberSet` tap.

mod bus;
mod event;

pub use bus::{Bus, DEFAULT_MAX_LISTENERS, Listener, SubscriptionId};
pub use event::{Event, EventKind, Payload, UnknownEvent};
