//! # Registry of in-flight tasks.
//!
//! Every submission is inserted before its driver is spawned and removed by
//! the driver after the terminal event. The orchestrator reads it for
//! `in_flight()` and to name the tasks still running when shutdown runs out
//! of grace.
//!
//! ## Rules
//! - Entries are keyed by [`TaskId`]; names may repeat.
//! - Removal is idempotent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::pipeline::JobShared;
use crate::tasks::{TaskId, TaskState};

/// Snapshot row returned by [`Registry::list`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct InFlight {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) state: TaskState,
}

#[derive(Default)]
pub(crate) struct Registry {
    tasks: Mutex<HashMap<TaskId, Arc<JobShared>>>,
}

impl Registry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn insert(&self, job: &Arc<JobShared>) {
        self.tasks().insert(job.id, Arc::clone(job));
    }

    pub(crate) fn remove(&self, id: TaskId) -> bool {
        self.tasks().remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks().len()
    }

    /// In-flight tasks sorted by name, then id.
    pub(crate) fn list(&self) -> Vec<InFlight> {
        let mut rows: Vec<InFlight> = self
            .tasks()
            .values()
            .map(|job| InFlight {
                id: job.id,
                name: job.name.to_string(),
                state: job.state(),
            })
            .collect();
        rows.sort_unstable_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rows
    }

    /// Cancels every registered task; returns how many were newly cancelled.
    pub(crate) fn cancel_all(&self) -> usize {
        let jobs: Vec<Arc<JobShared>> = self.tasks().values().cloned().collect();
        jobs.iter().filter(|job| job.cancel()).count()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, Arc<JobShared>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tokio_util::sync::CancellationToken;

    fn job(name: &str) -> Arc<JobShared> {
        Arc::new(JobShared::new(
            Arc::from(name),
            CancellationToken::new(),
            &ManualClock::new(),
        ))
    }

    #[test]
    fn lists_sorted_and_removes_idempotently() {
        let reg = Registry::new();
        let (b, a) = (job("beta"), job("alpha"));
        reg.insert(&b);
        reg.insert(&a);

        let names: Vec<_> = reg.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        assert!(reg.remove(a.id));
        assert!(!reg.remove(a.id));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn cancel_all_counts_each_task_once() {
        let reg = Registry::new();
        let (x, y) = (job("x"), job("y"));
        reg.insert(&x);
        reg.insert(&y);
        x.cancel();

        assert_eq!(reg.cancel_all(), 1);
        assert!(y.token.is_cancelled());
        assert_eq!(reg.cancel_all(), 0);
    }
}
