//! # Events emitted by the orchestrator and its gates.
//!
//! [`EventKind`] is the event *name*: every kind has a stable string form
//! (`"task:queued"`, `"circuit:open"`, ...) returned by [`EventKind::as_str`] and
//! accepted by its `FromStr` impl.
//!
//! The [`Event`] struct carries the payload as optional typed fields; which
//! ones are set depends on the kind (documented per variant).
//!
//! Applications publish their own events under [`EventKind::Custom`]: the
//! event name lives in `topic` and any `Send + Sync` value can ride along as
//! `payload` (see [`Event::custom`]).
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use taskgate::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskRetry)
//!     .with_name("fetch")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_millis(200))
//!     .with_reason("connection refused");
//!
//! assert_eq!(ev.kind.as_str(), "task:retry");
//! assert_eq!(ev.delay_ms, Some(200));
//!
//! let deploy = Event::custom("deploy:done").with_payload(17_u32);
//! assert_eq!(deploy.event_name(), "deploy:done");
//! assert_eq!(deploy.payload_ref::<u32>(), Some(&17));
//! ```

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::tasks::TaskId;

/// Event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Task lifecycle ===
    /// Task accepted by `submit`.
    ///
    /// Sets: `task`, `name`
    TaskQueued,

    /// An attempt is starting.
    ///
    /// Sets: `task`, `name`, `attempt`
    TaskStarted,

    /// A failed attempt will be retried after `delay_ms`.
    ///
    /// Sets: `task`, `name`, `attempt` (the upcoming retry, 1-based), `delay_ms`, `reason`
    TaskRetry,

    /// An attempt exceeded its deadline.
    ///
    /// Sets: `task`, `name`, `attempt`, `timeout_ms`
    TaskTimeout,

    /// Task finished with a value.
    ///
    /// Sets: `task`, `name`, `attempt`, `elapsed_ms`
    TaskSucceeded,

    /// Task finished with an error (including timeouts and gate rejections).
    ///
    /// Sets: `task`, `name`, `attempt`, `elapsed_ms`, `reason`
    TaskFailed,

    /// Task was cancelled.
    ///
    /// Sets: `task`, `name`, `attempt`, `elapsed_ms`
    TaskCancelled,

    // === Gates ===
    /// A task waited for, or was refused, a rate window slot.
    ///
    /// Sets: `task`, `name` (limiter key), `delay_ms`
    RateLimited,

    /// Breaker tripped (or a half-open trial failed).
    ///
    /// Sets: `name` (breaker), `reason`
    CircuitOpen,

    /// Breaker let a trial request through.
    ///
    /// Sets: `name` (breaker)
    CircuitHalfOpen,

    /// Breaker recovered.
    ///
    /// Sets: `name` (breaker)
    CircuitClosed,

    // === Errors ===
    /// Error report. Emitting it with no listener is an error.
    ///
    /// Sets: `reason`, optionally `name`
    Error,

    // === Application ===
    /// User-defined event; the actual name is in `topic`.
    ///
    /// Sets: `topic`, optionally `payload`
    Custom,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 13] = [
        EventKind::TaskQueued,
        EventKind::TaskStarted,
        EventKind::TaskRetry,
        EventKind::TaskTimeout,
        EventKind::TaskSucceeded,
        EventKind::TaskFailed,
        EventKind::TaskCancelled,
        EventKind::RateLimited,
        EventKind::CircuitOpen,
        EventKind::CircuitHalfOpen,
        EventKind::CircuitClosed,
        EventKind::Error,
        EventKind::Custom,
    ];

    /// Stable event name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TaskQueued => "task:queued",
            EventKind::TaskStarted => "task:started",
            EventKind::TaskRetry => "task:retry",
            EventKind::TaskTimeout => "task:timeout",
            EventKind::TaskSucceeded => "task:succeeded",
            EventKind::TaskFailed => "task:failed",
            EventKind::TaskCancelled => "task:cancelled",
            EventKind::RateLimited => "rate:limited",
            EventKind::CircuitOpen => "circuit:open",
            EventKind::CircuitHalfOpen => "circuit:half_open",
            EventKind::CircuitClosed => "circuit:closed",
            EventKind::Error => "error",
            EventKind::Custom => "custom",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown event name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name '{0}'")]
pub struct UnknownEvent(pub String);

impl FromStr for EventKind {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// Opaque application value attached to a [`EventKind::Custom`] event.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Immutable notification with optional payload fields.
#[derive(Clone)]
pub struct Event {
    /// Per-bus monotonic sequence number (assigned on emit).
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event name.
    pub kind: EventKind,
    /// Task the event is about, if any.
    pub task: Option<TaskId>,
    /// Operation, breaker or limiter name.
    pub name: Option<Arc<str>>,
    /// Attempt counter.
    pub attempt: Option<u32>,
    /// Delay in milliseconds (retry backoff, rate window wait).
    pub delay_ms: Option<u32>,
    /// Deadline in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Time since submission in milliseconds.
    pub elapsed_ms: Option<u32>,
    /// Human-readable reason (error message, panic info).
    pub reason: Option<Arc<str>>,
    /// Application event name, set for [`EventKind::Custom`].
    pub topic: Option<Arc<str>>,
    /// Application value, read back with [`Event::payload_ref`].
    pub payload: Option<Payload>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("seq", &self.seq)
            .field("at", &self.at)
            .field("kind", &self.kind)
            .field("task", &self.task)
            .field("name", &self.name)
            .field("attempt", &self.attempt)
            .field("delay_ms", &self.delay_ms)
            .field("timeout_ms", &self.timeout_ms)
            .field("elapsed_ms", &self.elapsed_ms)
            .field("reason", &self.reason)
            .field("topic", &self.topic)
            .field("payload", &self.payload.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Event {
    /// Creates an event of the given kind stamped with the current wall-clock time.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: 0,
            at: SystemTime::now(),
            kind,
            task: None,
            name: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            elapsed_ms: None,
            reason: None,
            topic: None,
            payload: None,
        }
    }

    /// Error event with a reason.
    pub fn error(reason: impl Into<Arc<str>>) -> Self {
        Event::new(EventKind::Error).with_reason(reason)
    }

    /// Application event published under `topic`.
    pub fn custom(topic: impl Into<Arc<str>>) -> Self {
        let mut ev = Event::new(EventKind::Custom);
        ev.topic = Some(topic.into());
        ev
    }

    /// Name listeners subscribe with: the topic for custom events, the kind otherwise.
    pub fn event_name(&self) -> &str {
        match (&self.kind, &self.topic) {
            (EventKind::Custom, Some(topic)) => topic,
            _ => self.kind.as_str(),
        }
    }

    /// Borrows the payload if it holds a `T`.
    pub fn payload_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref::<T>()
    }

    /// Attaches an application value.
    #[inline]
    pub fn with_payload<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.payload = Some(Arc::new(value));
        self
    }

    /// Attaches an already shared value.
    #[inline]
    pub fn with_shared_payload(mut self, value: Payload) -> Self {
        self.payload = Some(value);
        self
    }

    /// Sets the task the event is about.
    #[inline]
    pub fn with_task(mut self, id: TaskId) -> Self {
        self.task = Some(id);
        self
    }

    /// Sets the operation, breaker or limiter name.
    #[inline]
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the attempt counter.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Sets the delay, stored in whole milliseconds.
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Sets the deadline, stored in whole milliseconds.
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Sets the time since submission, stored in whole milliseconds.
    #[inline]
    pub fn with_elapsed(mut self, d: Duration) -> Self {
        self.elapsed_ms = Some(compact_ms(d));
        self
    }

    /// Sets the human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[inline]
fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert!("task:exploded".parse::<EventKind>().is_err());
    }

    #[test]
    fn durations_saturate_at_u32_millis() {
        let ev = Event::new(EventKind::TaskRetry).with_delay(Duration::from_secs(u64::MAX / 4));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }

    #[test]
    fn custom_events_carry_topic_and_typed_payload() {
        let ev = Event::custom("order:placed").with_payload(String::from("A-17"));
        assert_eq!(ev.kind, EventKind::Custom);
        assert_eq!(ev.event_name(), "order:placed");
        assert_eq!(ev.payload_ref::<String>().map(String::as_str), Some("A-17"));
        assert!(ev.payload_ref::<u32>().is_none());

        let builtin = Event::new(EventKind::TaskQueued);
        assert_eq!(builtin.event_name(), "task:queued");
        assert!(builtin.payload_ref::<String>().is_none());
    }
}
