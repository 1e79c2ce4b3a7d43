//! # Logging subscriber.
//!
//! [`LogWriter`] turns every event into a `tracing` record. Levels follow how
//! actionable the event is:
//!
//! | level   | events                                                        |
//! |---------|---------------------------------------------------------------|
//! | `trace` | `task:queued`                                                 |
//! | `debug` | `task:started`, `task:retry`, `task:succeeded`, `rate:limited`, `circuit:half_open`, custom |
//! | `info`  | `task:cancelled`, `circuit:closed`                            |
//! | `warn`  | `task:timeout`, `circuit:open`                                |
//! | `error` | `task:failed`, `error`                                        |
//!
//! The library never installs a global subscriber; pair this with
//! `tracing-subscriber` (see the demos).

use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn};

use super::Subscribe;
use crate::events::{Event, EventKind};

/// Human-readable message per event kind.
#[inline]
pub fn message_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::TaskQueued => "task queued",
        EventKind::TaskStarted => "attempt started",
        EventKind::TaskRetry => "retry scheduled after failure",
        EventKind::TaskTimeout => "attempt exceeded its deadline",
        EventKind::TaskSucceeded => "task succeeded",
        EventKind::TaskFailed => "task failed",
        EventKind::TaskCancelled => "task cancelled",
        EventKind::RateLimited => "task held by rate limiter",
        EventKind::CircuitOpen => "circuit opened",
        EventKind::CircuitHalfOpen => "circuit half-open, trial admitted",
        EventKind::CircuitClosed => "circuit closed",
        EventKind::Error => "error reported",
        EventKind::Custom => "application event",
    }
}

/// Writes one `tracing` record for `e`.
pub fn log_event(e: &Event) {
    let msg = message_for(e.kind);
    let task = e.task.map(|id| id.to_string()).unwrap_or_default();
    let name = e.name.as_deref().unwrap_or("unknown");
    let reason = e.reason.as_deref().unwrap_or("");
    let attempt = e.attempt.unwrap_or(0);

    match e.kind {
        EventKind::TaskQueued => trace!(seq = e.seq, %task, name, "{msg}"),
        EventKind::TaskStarted => debug!(seq = e.seq, %task, name, attempt, "{msg}"),
        EventKind::TaskRetry => debug!(
            seq = e.seq,
            %task,
            name,
            attempt,
            delay_ms = e.delay_ms.unwrap_or(0),
            reason,
            "{msg}"
        ),
        EventKind::TaskTimeout => warn!(
            seq = e.seq,
            %task,
            name,
            attempt,
            timeout_ms = e.timeout_ms.unwrap_or(0),
            "{msg}"
        ),
        EventKind::TaskSucceeded => debug!(
            seq = e.seq,
            %task,
            name,
            attempt,
            elapsed_ms = e.elapsed_ms.unwrap_or(0),
            "{msg}"
        ),
        EventKind::TaskFailed => error!(seq = e.seq, %task, name, attempt, reason, "{msg}"),
        EventKind::TaskCancelled => info!(seq = e.seq, %task, name, attempt, "{msg}"),
        EventKind::RateLimited => debug!(
            seq = e.seq,
            %task,
            limiter = name,
            delay_ms = e.delay_ms.unwrap_or(0),
            "{msg}"
        ),
        EventKind::CircuitOpen => warn!(seq = e.seq, breaker = name, reason, "{msg}"),
        EventKind::CircuitHalfOpen => debug!(seq = e.seq, breaker = name, "{msg}"),
        EventKind::CircuitClosed => info!(seq = e.seq, breaker = name, "{msg}"),
        EventKind::Error => error!(seq = e.seq, source = name, reason, "{msg}"),
        EventKind::Custom => debug!(seq = e.seq, event = e.event_name(), %task, "{msg}"),
    }
}

/// Subscriber that logs every event through `tracing`.
///
/// ```rust
/// use std::sync::Arc;
/// use taskgate::{LogWriter, Orchestrator, OrchestratorConfig, Subscribe};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
/// let orch = Orchestrator::builder(OrchestratorConfig::default())
///     .with_subscribers(subs)
///     .build()
///     .unwrap();
/// # drop(orch);
/// # }
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        log_event(e);
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
