//! # Task lifecycle states.
//!
//! ```text
//! Pending ──► Admitted ──► Running ──► Succeeded
//!    │            │          │  ▲
//!    │            │          ▼  │
//!    │            │        Retrying
//!    │            │          │
//!    └────────────┴──────────┴──► Failed | Cancelled | TimedOut
//! ```
//!
//! ## Rules
//! - Transitions only move forward; nothing re-enters `Pending`.
//! - `Retrying → Running` is the only loop.
//! - Terminal states (`Succeeded`, `Failed`, `Cancelled`, `TimedOut`) are final.

use std::fmt;

use tokio::time::Instant;

/// Lifecycle state of a submitted task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Submitted, waiting on the rate limiter / circuit breaker / permit queue.
    Pending,
    /// Passed every admission gate and holds a concurrency permit.
    Admitted,
    /// An attempt is executing.
    Running,
    /// Sleeping before the next attempt.
    Retrying,
    /// Finished with a value.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Cancelled by the caller or by shutdown.
    Cancelled,
    /// The final attempt hit its deadline.
    TimedOut,
}

impl TaskState {
    /// True for states a task never leaves.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled | TaskState::TimedOut
        )
    }

    /// Whether `self → next` is a legal transition.
    ///
    /// ```
    /// use taskgate::TaskState;
    ///
    /// assert!(TaskState::Retrying.can_advance_to(TaskState::Running));
    /// assert!(!TaskState::Admitted.can_advance_to(TaskState::Pending));
    /// assert!(!TaskState::Cancelled.can_advance_to(TaskState::Succeeded));
    /// ```
    pub fn can_advance_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Admitted | Failed | Cancelled) => true,
            (Admitted, Running | Failed | Cancelled) => true,
            (Running, Succeeded | Retrying | Failed | Cancelled | TimedOut) => true,
            (Retrying, Running | Failed | Cancelled) => true,
            _ => false,
        }
    }

    /// Short lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Admitted => "admitted",
            TaskState::Running => "running",
            TaskState::Retrying => "retrying",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
            TaskState::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latency bookkeeping for one task.
#[derive(Clone, Copy, Debug)]
pub struct TaskTimings {
    /// When the task was submitted.
    pub enqueued_at: Instant,
    /// When the first attempt started.
    pub started_at: Option<Instant>,
    /// When the task reached a terminal state.
    pub completed_at: Option<Instant>,
}

impl TaskTimings {
    pub(crate) fn new(enqueued_at: Instant) -> Self {
        Self {
            enqueued_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Time spent between submission and the first attempt.
    pub fn queue_delay(&self) -> Option<std::time::Duration> {
        self.started_at
            .map(|s| s.saturating_duration_since(self.enqueued_at))
    }

    /// Total time between submission and completion.
    pub fn total(&self) -> Option<std::time::Duration> {
        self.completed_at
            .map(|c| c.saturating_duration_since(self.enqueued_at))
    }
}

#[cfg(test)]
mod tests {
    use super::TaskState::*;
    use super::*;

    const ALL: [TaskState; 8] = [
        Pending, Admitted, Running, Retrying, Succeeded, Failed, Cancelled, TimedOut,
    ];

    #[test]
    fn nothing_reenters_pending() {
        for from in ALL {
            assert!(!from.can_advance_to(Pending), "{from} -> pending");
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_advance_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn retry_loop_is_the_only_cycle() {
        assert!(Running.can_advance_to(Retrying));
        assert!(Retrying.can_advance_to(Running));
        assert!(!Running.can_advance_to(Admitted));
        assert!(!Retrying.can_advance_to(Succeeded));
    }
}
