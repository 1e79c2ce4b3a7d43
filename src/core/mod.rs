//! Runtime core: submission, per-task driving and shutdown.
//!
//! The public API from this module is [`Orchestrator`] (with its builder and
//! config) and the caller-side [`TaskHandle`].
//!
//! Internal modules:
//! - [`runner`]: executes one attempt and handles cancellation grace;
//! - [`driver`]: runs a job through the pipeline and settles its terminal state;
//! - [`registry`]: tracks in-flight tasks for introspection and shutdown;
//! - [`orchestrator`]: gate resolution, observability surface, shutdown.

mod builder;
mod config;
mod driver;
mod handle;
mod orchestrator;
mod registry;
pub(crate) mod runner;

pub use builder::OrchestratorBuilder;
pub use config::OrchestratorConfig;
pub use handle::{TaskCanceller, TaskHandle};
pub use orchestrator::{Orchestrator, TaskInfo};
