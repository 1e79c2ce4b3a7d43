//! # Synchronous event bus.
//!
//! [`Bus`] keeps an ordered listener table and dispatches each event to the
//! matching listeners **on the emitting task**, in registration order, before
//! `emit` returns.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                     Listeners (registration order):
//!   Orchestrator ──┐                      ┌──► on(TaskQueued, ..)
//!   Stages       ──┼──► Bus::emit(ev) ────┼──► once(TaskSucceeded, ..)   (removed before call)
//!   Breakers     ──┘    (table snapshot)  ├──► on_task(id, TaskRetry, ..)
//!                                         └──► tap(..)  ──► SubscriberSet (async fan-out)
//! ```
//!
//! ## Rules
//! - **Snapshot dispatch**: the table lock is released before listeners run, so
//!   listeners may emit, subscribe or unsubscribe re-entrantly.
//! - **Isolation**: a panicking listener is caught; the panic is reported as an
//!   `error` event (or logged if nobody listens for `error`) and the remaining
//!   listeners still run.
//! - **Loud errors**: emitting [`EventKind::Error`] with no `error` listener returns
//!   [`BusError::UnhandledError`]. Wildcard taps do not count as handlers.
//! - **Leak hint**: more than `max_listeners` listeners for one event logs a
//!   warning once; registration is never refused.
//! - **Named events**: [`Bus::on_name`] and [`Bus::emit_named`] take a string;
//!   built-in names map to their [`EventKind`], anything else is an
//!   application event ([`EventKind::Custom`]) matched by topic.
//! - **No replay**: events are not stored.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{error, warn};

use super::event::{Event, EventKind};
use crate::error::BusError;
use crate::tasks::TaskId;

/// Default soft cap on listeners per event.
pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// Listener callback.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// Handle returned by registrations; pass it to [`Bus::off`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    /// `None` = every kind (tap).
    kind: Option<EventKind>,
    /// `None` = every topic of a custom kind.
    topic: Option<Arc<str>>,
    /// `None` = every task.
    task: Option<TaskId>,
    once: bool,
    callback: Listener,
}

impl Entry {
    fn matches(&self, ev: &Event) -> bool {
        self.kind.is_none_or(|k| k == ev.kind)
            && self.topic.as_deref().is_none_or(|t| ev.topic.as_deref() == Some(t))
            && self.task.is_none_or(|t| ev.task == Some(t))
    }
}

#[derive(Default)]
struct Table {
    entries: Vec<Entry>,
    warned: HashSet<String>,
}

struct Inner {
    table: Mutex<Table>,
    next_id: AtomicU64,
    seq: AtomicU64,
    max_listeners: AtomicUsize,
}

/// Named publish/subscribe dispatcher.
///
/// Cheap to clone; clones share one listener table and one sequence counter.
///
/// ## Example
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use taskgate::{Bus, Event, EventKind};
///
/// let bus = Bus::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let sink = Arc::clone(&seen);
/// bus.on(EventKind::TaskQueued, move |ev| sink.lock().unwrap().push(ev.seq));
///
/// bus.emit(Event::new(EventKind::TaskQueued)).unwrap();
/// bus.emit(Event::new(EventKind::TaskQueued)).unwrap();
/// assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
///
/// // Nobody handles errors yet:
/// assert!(bus.emit(Event::error("boom")).is_err());
/// ```
#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

impl Bus {
    /// Creates a bus with the default soft cap (10 listeners per event).
    pub fn new() -> Self {
        Self::with_max_listeners(DEFAULT_MAX_LISTENERS)
    }

    /// Creates a bus with a custom soft cap (`0` = no warning).
    pub fn with_max_listeners(max: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(Table::default()),
                next_id: AtomicU64::new(0),
                seq: AtomicU64::new(0),
                max_listeners: AtomicUsize::new(max),
            }),
        }
    }

    /// Changes the soft cap (`0` = no warning).
    pub fn set_max_listeners(&self, max: usize) {
        self.inner.max_listeners.store(max, Ordering::Relaxed);
    }

    /// Registers `f` for every `kind` event.
    pub fn on<F>(&self, kind: EventKind, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), None, None, false, Arc::new(f))
    }

    /// Registers `f` for the next `kind` event only.
    pub fn once<F>(&self, kind: EventKind, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), None, None, true, Arc::new(f))
    }

    /// Registers `f` for every event of every kind.
    pub fn tap<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, None, None, false, Arc::new(f))
    }

    /// Registers `f` for `kind` events about one task.
    ///
    /// Task-scoped listeners are dropped when the task finishes.
    pub fn on_task<F>(&self, task: TaskId, kind: EventKind, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), None, Some(task), false, Arc::new(f))
    }

    /// Registers `f` for every event called `name`.
    ///
    /// Built-in names (`"task:retry"`) subscribe to that kind; any other name
    /// subscribes to application events published under it.
    pub fn on_name<F>(&self, name: &str, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let (kind, topic) = resolve(name);
        self.register(Some(kind), topic, None, false, Arc::new(f))
    }

    /// Registers `f` for the next event called `name`.
    pub fn once_name<F>(&self, name: &str, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let (kind, topic) = resolve(name);
        self.register(Some(kind), topic, None, true, Arc::new(f))
    }

    /// Removes a listener. Returns `false` if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut table = self.table();
        let before = table.entries.len();
        table.entries.retain(|e| e.id != id);
        table.entries.len() != before
    }

    /// Removes every listener scoped to `task`.
    pub(crate) fn off_task(&self, task: TaskId) -> usize {
        let mut table = self.table();
        let before = table.entries.len();
        table.entries.retain(|e| e.task != Some(task));
        before - table.entries.len()
    }

    /// Number of listeners registered specifically for `kind` (taps excluded).
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.table()
            .entries
            .iter()
            .filter(|e| e.kind == Some(kind))
            .count()
    }

    /// Builds an event called `name` carrying `payload` and emits it.
    ///
    /// # Errors
    /// Same as [`Bus::emit`]; emitting `"error"` this way with no `error`
    /// listener is reported as unhandled.
    pub fn emit_named<T>(&self, name: &str, payload: T) -> Result<usize, BusError>
    where
        T: Any + Send + Sync,
    {
        let (kind, topic) = resolve(name);
        let mut ev = Event::new(kind).with_payload(payload);
        ev.topic = topic;
        self.emit(ev)
    }

    /// Dispatches `ev` to every matching listener and returns how many ran.
    ///
    /// # Errors
    /// [`BusError::UnhandledError`] if `ev` is an [`EventKind::Error`] and no
    /// `error` listener is registered. Taps still observe the event.
    pub fn emit(&self, mut ev: Event) -> Result<usize, BusError> {
        ev.seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let (targets, handled) = self.take_targets(&ev);

        self.dispatch(&ev, &targets);

        if ev.kind == EventKind::Error && !handled {
            return Err(BusError::UnhandledError {
                reason: ev.reason.as_deref().unwrap_or("unknown").to_string(),
            });
        }
        Ok(targets.len())
    }

    /// Emits an internally generated event; an unhandled `error` is logged instead.
    pub(crate) fn publish(&self, ev: Event) {
        if let Err(err) = self.emit(ev) {
            error!(error = %err, "unhandled error event");
        }
    }

    fn register(
        &self,
        kind: Option<EventKind>,
        topic: Option<Arc<str>>,
        task: Option<TaskId>,
        once: bool,
        callback: Listener,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let max = self.inner.max_listeners.load(Ordering::Relaxed);

        let mut table = self.table();
        if let (Some(kind), None) = (kind, task) {
            let count = 1 + table
                .entries
                .iter()
                .filter(|e| e.kind == Some(kind) && e.topic == topic && e.task.is_none())
                .count();
            let name = topic.as_deref().unwrap_or(kind.as_str());
            if max > 0 && count > max && table.warned.insert(name.to_string()) {
                warn!(
                    event = name,
                    count,
                    max,
                    "possible listener leak: listener count exceeds max_listeners"
                );
            }
        }
        table.entries.push(Entry {
            id,
            kind,
            topic,
            task,
            once,
            callback,
        });
        id
    }

    /// Snapshots matching callbacks and drops matched `once` entries.
    fn take_targets(&self, ev: &Event) -> (Vec<Listener>, bool) {
        let mut table = self.table();
        let mut targets = Vec::new();
        let mut handled = false;

        table.entries.retain(|e| {
            if !e.matches(ev) {
                return true;
            }
            handled |= e.kind.is_some();
            targets.push(Arc::clone(&e.callback));
            !e.once
        });
        (targets, handled)
    }

    fn dispatch(&self, ev: &Event, targets: &[Listener]) {
        for callback in targets {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(ev))) {
                self.report_panic(ev, panic_message(panic.as_ref()));
            }
        }
    }

    fn report_panic(&self, ev: &Event, info: String) {
        if ev.kind == EventKind::Error {
            error!(info = %info, "error listener panicked");
            return;
        }
        let name = ev.event_name();
        self.publish(Event::error(format!("listener for '{name}' panicked: {info}")).with_name(name));
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("listeners", &self.table().entries.len())
            .field("seq", &self.inner.seq.load(Ordering::Relaxed))
            .finish()
    }
}

/// Maps a listener-facing name to its kind and, for application events, topic.
fn resolve(name: &str) -> (EventKind, Option<Arc<str>>) {
    match name.parse::<EventKind>() {
        Ok(EventKind::Custom) | Err(_) => (EventKind::Custom, Some(Arc::from(name))),
        Ok(kind) => (kind, None),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Listener) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |tag: &'static str| -> Listener {
            let sink = Arc::clone(&sink);
            Arc::new(move |ev: &Event| sink.lock().unwrap().push(format!("{tag}:{}", ev.kind)))
        };
        (log, make)
    }

    #[test]
    fn dispatches_in_registration_order() {
        let bus = Bus::new();
        let (log, make) = recorder();
        for tag in ["a", "b", "c"] {
            let l = make(tag);
            bus.on(EventKind::TaskStarted, move |ev| l(ev));
        }

        assert_eq!(bus.emit(Event::new(EventKind::TaskStarted)), Ok(3));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:task:started", "b:task:started", "c:task:started"]
        );
    }

    #[test]
    fn once_fires_a_single_time() {
        let bus = Bus::new();
        let (log, make) = recorder();
        let l = make("once");
        bus.once(EventKind::TaskQueued, move |ev| l(ev));

        bus.emit(Event::new(EventKind::TaskQueued)).unwrap();
        bus.emit(Event::new(EventKind::TaskQueued)).unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(bus.listener_count(EventKind::TaskQueued), 0);
    }

    #[test]
    fn off_removes_and_reports() {
        let bus = Bus::new();
        let id = bus.on(EventKind::TaskQueued, |_| {});
        assert!(bus.off(id));
        assert!(!bus.off(id));
        assert_eq!(bus.emit(Event::new(EventKind::TaskQueued)), Ok(0));
    }

    #[test]
    fn panicking_listener_does_not_stop_siblings() {
        let bus = Bus::new();
        let (log, make) = recorder();

        bus.on(EventKind::TaskFailed, |_| panic!("listener bug"));
        let l = make("after");
        bus.on(EventKind::TaskFailed, move |ev| l(ev));
        let errors = make("err");
        bus.on(EventKind::Error, move |ev| errors(ev));

        bus.emit(Event::new(EventKind::TaskFailed)).unwrap();
        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["err:error", "after:task:failed"]);
    }

    #[test]
    fn panic_reports_carry_the_message() {
        let bus = Bus::new();
        let reason = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&reason);
        bus.on(EventKind::Error, move |ev| {
            *sink.lock().unwrap() = ev.reason.as_deref().map(str::to_string);
        });
        bus.on(EventKind::TaskStarted, |_| panic!("kaput"));

        bus.emit(Event::new(EventKind::TaskStarted)).unwrap();
        let got = reason.lock().unwrap().clone().unwrap();
        assert!(got.contains("task:started") && got.contains("kaput"), "{got}");
    }

    #[test]
    fn unhandled_error_fails_loudly() {
        let bus = Bus::new();
        let tapped = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&tapped);
        bus.tap(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        });

        let err = bus.emit(Event::error("disk on fire")).unwrap_err();
        assert_eq!(
            err,
            BusError::UnhandledError {
                reason: "disk on fire".into()
            }
        );
        assert_eq!(tapped.load(Ordering::SeqCst), 1);

        bus.on(EventKind::Error, |_| {});
        assert_eq!(bus.emit(Event::error("handled")), Ok(2));
    }

    #[test]
    fn soft_cap_is_advisory() {
        let bus = Bus::with_max_listeners(2);
        for _ in 0..5 {
            bus.on(EventKind::TaskRetry, |_| {});
        }
        assert_eq!(bus.listener_count(EventKind::TaskRetry), 5);
        assert_eq!(bus.emit(Event::new(EventKind::TaskRetry)), Ok(5));
    }

    #[test]
    fn task_scoped_listeners_filter_and_clean_up() {
        let bus = Bus::new();
        let (a, b) = (TaskId::new(), TaskId::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.on_task(a, EventKind::TaskStarted, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::new(EventKind::TaskStarted).with_task(b)).unwrap();
        bus.emit(Event::new(EventKind::TaskStarted).with_task(a)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert_eq!(bus.off_task(a), 1);
        bus.emit(Event::new(EventKind::TaskStarted).with_task(a)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_may_reenter_the_bus() {
        let bus = Bus::new();
        let inner = bus.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);

        bus.on(EventKind::TaskQueued, move |_| {
            let h = Arc::clone(&h);
            inner.once(EventKind::TaskStarted, move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });
            inner.emit(Event::new(EventKind::TaskStarted)).unwrap();
        });

        bus.emit(Event::new(EventKind::TaskQueued)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn named_events_reach_only_their_listeners() {
        #[derive(Debug, PartialEq)]
        struct OrderPlaced {
            id: u32,
            total_cents: u64,
        }

        let bus = Bus::new();
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        bus.on_name("order:placed", move |ev| {
            let order = ev.payload_ref::<OrderPlaced>().unwrap();
            sink.lock().unwrap().push((ev.event_name().to_string(), order.id, order.total_cents));
        });
        let shipped = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&shipped);
        bus.on_name("order:shipped", move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        let ran = bus
            .emit_named("order:placed", OrderPlaced { id: 7, total_cents: 1250 })
            .unwrap();
        assert_eq!(ran, 1);
        assert_eq!(*got.lock().unwrap(), vec![("order:placed".to_string(), 7, 1250)]);
        assert_eq!(shipped.load(Ordering::SeqCst), 0);
        assert_eq!(bus.emit_named("order:refunded", ()), Ok(0));
    }

    #[test]
    fn builtin_names_resolve_to_their_kind() {
        let bus = Bus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.once_name("task:retry", move |ev| {
            assert_eq!(ev.kind, EventKind::TaskRetry);
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::new(EventKind::TaskRetry)).unwrap();
        bus.emit_named("task:retry", 0_u8).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(bus.emit_named("error", "no one listening").is_err());
    }

    #[test]
    fn custom_kind_listener_sees_every_topic() {
        let bus = Bus::new();
        let topics = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&topics);
        bus.on(EventKind::Custom, move |ev| {
            sink.lock().unwrap().push(ev.event_name().to_string());
        });

        bus.emit_named("a", ()).unwrap();
        bus.emit(Event::custom("b")).unwrap();
        assert_eq!(*topics.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn panics_in_named_listeners_report_the_topic() {
        let bus = Bus::new();
        let reason = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&reason);
        bus.on(EventKind::Error, move |ev| {
            *sink.lock().unwrap() = ev.reason.as_deref().unwrap_or_default().to_string();
        });
        bus.on_name("cache:evicted", |_| panic!("bad key"));

        bus.emit_named("cache:evicted", "k1").unwrap();
        let got = reason.lock().unwrap().clone();
        assert!(got.contains("cache:evicted") && got.contains("bad key"), "{got}");
    }

    #[test]
    fn sequence_numbers_are_per_bus() {
        let (one, two) = (Bus::new(), Bus::new());
        let seqs = Arc::new(Mutex::new(Vec::new()));
        for bus in [&one, &two] {
            let s = Arc::clone(&seqs);
            bus.tap(move |ev| s.lock().unwrap().push(ev.seq));
        }
        one.emit(Event::new(EventKind::TaskQueued)).unwrap();
        one.emit(Event::new(EventKind::TaskQueued)).unwrap();
        two.emit(Event::new(EventKind::TaskQueued)).unwrap();
        assert_eq!(*seqs.lock().unwrap(), vec![0, 1, 0]);
    }
}
