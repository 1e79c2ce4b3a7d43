//! # Circuit breaker.
//!
//! Failure-rate gate with three states:
//!
//! ```text
//!            failures in window >= threshold
//!   Closed ──────────────────────────────────► Open ◄──────────┐
//!     ▲                                          │             │
//!     │ trial succeeded          reset_timeout   │             │ trial failed
//!     │                          elapsed         ▼             │ (timer restarts)
//!     └──────────────────────────────────── HalfOpen ──────────┘
//!                                   (exactly one trial in flight)
//! ```
//!
//! ## Rules
//! - Failures are counted in a trailing `window`; successes while closed do not
//!   clear them.
//! - Only `HalfOpen` may go back to `Closed` or `Open`.
//! - Cancelled outcomes are not counted; a trial permit dropped without an
//!   outcome frees the trial slot.
//! - Outcomes of calls admitted before the breaker opened are ignored once it
//!   has left `Closed`.
//! - Transitions are logged and, when a [`Bus`] is attached, published as
//!   `circuit:open` / `circuit:half_open` / `circuit:closed`.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::clock::{Clock, TokioClock};
use crate::error::{ConfigError, ExecError};
use crate::events::{Bus, Event, EventKind};

/// Breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass; failures are counted.
    Closed,
    /// Calls are rejected until `reset_timeout` elapses.
    Open,
    /// One trial call decides between `Closed` and `Open`.
    HalfOpen,
}

impl CircuitState {
    /// Stable lowercase name (`closed`, `open`, `half_open`).
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Breaker thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures within `window` that open the circuit. Must be > 0.
    pub failure_threshold: u32,
    /// Time spent open before a trial is allowed.
    pub reset_timeout: Duration,
    /// Trailing window in which failures are counted.
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    /// `failure_threshold = 5`, `reset_timeout = 30s`, `window = 60s`.
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            window: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Threshold and reset timeout, default window.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            ..Self::default()
        }
    }

    /// Sets the failure-counting window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold { name: name.into() });
        }
        if self.window.is_zero() {
            return Err(ConfigError::InvalidBreakerWindow { name: name.into() });
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Failures inside the trailing window.
    pub failure_count: usize,
    /// Successes since the breaker last closed.
    pub success_count: u64,
    /// When the breaker last changed state.
    pub last_state_change: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

struct Inner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    successes: u64,
    opened_at: Option<Instant>,
    last_change: Instant,
    trial_in_flight: bool,
}

/// Named failure-rate gate.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use taskgate::{CircuitBreaker, CircuitBreakerConfig, CircuitState, ExecError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let breaker = CircuitBreaker::new("db", CircuitBreakerConfig::new(1, Duration::from_secs(5))).unwrap();
///
/// let res: Result<(), _> = breaker.fire(|| async { Err(ExecError::Timeout { timeout: Duration::from_secs(1) }) }).await;
/// assert!(res.is_err());
/// assert_eq!(breaker.state(), CircuitState::Open);
///
/// let res = breaker.fire(|| async { Ok::<_, ExecError>(1) }).await;
/// assert!(matches!(res, Err(ExecError::CircuitOpen { .. })));
/// # }
/// ```
pub struct CircuitBreaker {
    name: Arc<str>,
    cfg: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    bus: Option<Bus>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a breaker on tokio time, without event publishing.
    ///
    /// # Errors
    /// [`ConfigError::InvalidFailureThreshold`] if the threshold is zero.
    pub fn new(name: impl Into<Arc<str>>, cfg: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, cfg, Arc::new(TokioClock))
    }

    /// Creates a breaker reading time from `clock`.
    ///
    /// # Errors
    /// [`ConfigError::InvalidFailureThreshold`] if the threshold is zero.
    pub fn with_clock(
        name: impl Into<Arc<str>>,
        cfg: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        cfg.validate(&name)?;
        let now = clock.now();
        Ok(Self {
            name,
            cfg,
            clock,
            bus: None,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                successes: 0,
                opened_at: None,
                last_change: now,
                trial_in_flight: false,
            }),
        })
    }

    /// Publishes state transitions on `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker thresholds.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    /// Stored state. An expired `Open` only turns `HalfOpen` on the next acquire.
    pub fn state(&self) -> CircuitState {
        self.inner().state
    }

    /// Current counters.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = self.clock.now();
        let mut inner = self.inner();
        self.prune(&mut inner, now);
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failures.len(),
            success_count: inner.successes,
            last_state_change: inner.last_change,
        }
    }

    /// Asks for admission.
    ///
    /// The returned permit must be settled with [`CircuitPermit::success`] or
    /// [`CircuitPermit::failure`]; dropping it records nothing.
    ///
    /// # Errors
    /// [`ExecError::CircuitOpen`] while open, or while half-open with the trial taken.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, ExecError> {
        let now = self.clock.now();
        let mut inner = self.inner();

        let admission = match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.cfg.reset_timeout);
                if !expired {
                    return Err(self.open_error());
                }
                self.transition(&mut inner, CircuitState::HalfOpen, now);
                inner.trial_in_flight = true;
                drop(inner);

                info!(breaker = %self.name, "circuit half-open, admitting trial");
                self.notify(Event::new(EventKind::CircuitHalfOpen));
                return Ok(CircuitPermit::new(self, Admission::Trial));
            }
            CircuitState::HalfOpen if inner.trial_in_flight => return Err(self.open_error()),
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Admission::Trial
            }
        };
        Ok(CircuitPermit::new(self, admission))
    }

    /// Runs `f` behind the breaker and records its outcome.
    ///
    /// # Errors
    /// [`ExecError::CircuitOpen`] without calling `f`, or whatever `f` returns.
    pub async fn fire<F, Fut, T>(&self, f: F) -> Result<T, ExecError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ExecError>>,
    {
        let permit = self.try_acquire()?;
        let res = f().await;
        permit.settle(&res);
        res
    }

    fn on_success(&self, admission: Admission) {
        let now = self.clock.now();
        let mut inner = self.inner();

        match (admission, inner.state) {
            (Admission::Normal, CircuitState::Closed) => inner.successes += 1,
            (Admission::Trial, CircuitState::HalfOpen) => {
                inner.trial_in_flight = false;
                inner.failures.clear();
                inner.successes = 0;
                inner.opened_at = None;
                self.transition(&mut inner, CircuitState::Closed, now);
                drop(inner);

                info!(breaker = %self.name, "circuit closed after successful trial");
                self.notify(Event::new(EventKind::CircuitClosed));
            }
            _ => {}
        }
    }

    fn on_failure(&self, admission: Admission, reason: &str) {
        let now = self.clock.now();
        let mut inner = self.inner();

        match (admission, inner.state) {
            (Admission::Normal, CircuitState::Closed) => {
                inner.failures.push_back(now);
                self.prune(&mut inner, now);
                let count = inner.failures.len();
                if count < self.cfg.failure_threshold as usize {
                    return;
                }
                inner.opened_at = Some(now);
                self.transition(&mut inner, CircuitState::Open, now);
                drop(inner);

                warn!(breaker = %self.name, failures = count, reason, "circuit opened");
                self.notify(Event::new(EventKind::CircuitOpen).with_reason(reason));
            }
            (Admission::Trial, CircuitState::HalfOpen) => {
                inner.trial_in_flight = false;
                inner.opened_at = Some(now);
                self.transition(&mut inner, CircuitState::Open, now);
                drop(inner);

                warn!(breaker = %self.name, reason, "trial failed, circuit re-opened");
                self.notify(Event::new(EventKind::CircuitOpen).with_reason(reason));
            }
            _ => {}
        }
    }

    fn on_release(&self, admission: Admission) {
        if admission == Admission::Trial {
            let mut inner = self.inner();
            if inner.state == CircuitState::HalfOpen {
                inner.trial_in_flight = false;
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        inner.state = to;
        inner.last_change = now;
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        while let Some(oldest) = inner.failures.front() {
            if now.saturating_duration_since(*oldest) >= self.cfg.window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn notify(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(ev.with_name(Arc::clone(&self.name)));
        }
    }

    fn open_error(&self) -> ExecError {
        ExecError::CircuitOpen {
            breaker: Arc::clone(&self.name),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("cfg", &self.cfg)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
#[must_use = "settle the permit with success() or failure()"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            admission,
            settled: false,
        }
    }

    /// True if this permit is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.admission == Admission::Trial
    }

    /// Records a success.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.admission);
    }

    /// Records a failure.
    pub fn failure(mut self, reason: &str) {
        self.settled = true;
        self.breaker.on_failure(self.admission, reason);
    }

    /// Records the outcome of `res`; cancellation is not counted.
    pub fn settle<T>(self, res: &Result<T, ExecError>) {
        match res {
            Ok(_) => self.success(),
            Err(e) if e.is_canceled() => drop(self),
            Err(e) => self.failure(&e.to_string()),
        }
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.admission);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(threshold: u32, reset_ms: u64) -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::new());
        let cfg = CircuitBreakerConfig::new(threshold, Duration::from_millis(reset_ms))
            .with_window(Duration::from_secs(10));
        let cb = CircuitBreaker::with_clock("svc", cfg, clock.clone()).unwrap();
        (clock, cb)
    }

    fn fail(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().failure("boom");
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = CircuitBreaker::new("x", CircuitBreakerConfig::new(0, Duration::from_secs(1)));
        assert_eq!(
            err.unwrap_err(),
            ConfigError::InvalidFailureThreshold { name: "x".into() }
        );
    }

    #[test]
    fn zero_window_is_rejected() {
        let cfg = CircuitBreakerConfig::new(1, Duration::from_secs(1)).with_window(Duration::ZERO);
        assert_eq!(
            CircuitBreaker::new("x", cfg).unwrap_err(),
            ConfigError::InvalidBreakerWindow { name: "x".into() }
        );
    }

    #[test]
    fn opens_at_threshold_and_rejects() {
        let (_clock, cb) = breaker(3, 1000);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.try_acquire(), Err(ExecError::CircuitOpen { .. })));
    }

    #[test]
    fn successes_do_not_clear_windowed_failures() {
        let (_clock, cb) = breaker(2, 1000);
        fail(&cb);
        cb.try_acquire().unwrap().success();
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn failures_outside_the_window_expire() {
        let (clock, cb) = breaker(2, 1000);
        fail(&cb);
        clock.advance(Duration::from_secs(11));
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 1);
    }

    #[test]
    fn half_open_admits_exactly_one_trial() {
        let (clock, cb) = breaker(1, 500);
        fail(&cb);
        clock.advance(Duration::from_millis(500));

        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().is_err());

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[test]
    fn failed_trial_restarts_the_timer() {
        let (clock, cb) = breaker(1, 500);
        fail(&cb);
        clock.advance(Duration::from_millis(600));
        cb.try_acquire().unwrap().failure("still down");
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(499));
        assert!(cb.try_acquire().is_err());
        clock.advance(Duration::from_millis(1));
        assert!(cb.try_acquire().unwrap().is_trial());
    }

    #[test]
    fn dropped_trial_frees_the_slot() {
        let (clock, cb) = breaker(1, 100);
        fail(&cb);
        clock.advance(Duration::from_millis(100));

        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().unwrap().is_trial());
    }

    #[test]
    fn late_outcomes_are_ignored_once_open() {
        let (_clock, cb) = breaker(1, 1000);
        let late = cb.try_acquire().unwrap();
        fail(&cb);
        late.success();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn transitions_are_published_in_order() {
        let clock = Arc::new(ManualClock::new());
        let bus = Bus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.tap(move |ev| {
            sink.lock()
                .unwrap()
                .push((ev.kind, ev.name.as_deref().map(str::to_string)))
        });

        let cb = CircuitBreaker::with_clock(
            "api",
            CircuitBreakerConfig::new(1, Duration::from_millis(10)),
            clock.clone(),
        )
        .unwrap()
        .with_bus(bus);

        fail(&cb);
        clock.advance(Duration::from_millis(10));
        cb.try_acquire().unwrap().success();

        let kinds: Vec<_> = seen.lock().unwrap().iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::CircuitOpen,
                EventKind::CircuitHalfOpen,
                EventKind::CircuitClosed
            ]
        );
        assert!(seen.lock().unwrap().iter().all(|(_, n)| n.as_deref() == Some("api")));
    }

    #[tokio::test]
    async fn fire_does_not_count_cancellation() {
        let (_clock, cb) = breaker(1, 1000);
        let res: Result<(), _> = cb.fire(|| async { Err(ExecError::Canceled) }).await;
        assert!(res.unwrap_err().is_canceled());
        assert_eq!(cb.state(), CircuitState::Closed);

        let res: Result<(), _> = cb
            .fire(|| async { Err(ExecError::Timeout { timeout: Duration::from_secs(1) }) })
            .await;
        assert!(res.unwrap_err().is_timeout());
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
