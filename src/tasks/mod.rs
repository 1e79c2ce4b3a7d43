//! # Task abstractions and per-task options.
//!
//! - [`Operation`] - trait for async, cancelable task bodies
//! - [`OpFn`] - closure-backed operation
//! - [`TaskOptions`] - which gates a submission goes through and how
//! - [`TaskId`], [`TaskState`] - identity and lifecycle

mod id;
mod spec;
mod state;
mod task;
mod task_fn;

pub use id::TaskId;
pub use spec::{CircuitOptions, TaskOptions};
pub use state::{TaskState, TaskTimings};
pub use task::Operation;
pub use task_fn::OpFn;
