use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use super::config::{GLOBAL_POOL, OrchestratorConfig};
use super::orchestrator::{Orchestrator, Subscribers};
use super::registry::Registry;
use crate::clock::{Clock, TokioClock};
use crate::control::{ConcurrencyLimiter, RateLimiter};
use crate::error::ConfigError;
use crate::events::Bus;
use crate::pipeline::Pipeline;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for an [`Orchestrator`].
///
/// ## Example
/// ```rust
/// use taskgate::{Orchestrator, OrchestratorConfig};
///
/// let orch = Orchestrator::builder(OrchestratorConfig::default()).build().unwrap();
/// assert_eq!(orch.in_flight(), 0);
/// ```
pub struct OrchestratorBuilder {
    cfg: OrchestratorConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    clock: Arc<dyn Clock>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: OrchestratorConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            clock: Arc::new(TokioClock),
        }
    }

    /// Sets async event subscribers.
    ///
    /// Each subscriber gets its own bounded queue and worker task, so a
    /// non-empty list requires building inside a tokio runtime.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the monotonic clock used by rate windows, breakers and task timings.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates the configuration and builds the orchestrator.
    ///
    /// # Errors
    /// [`ConfigError`] for a zero rate limit, window or concurrency cap.
    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        self.cfg.validate()?;

        let bus = Bus::with_max_listeners(self.cfg.max_listeners);

        let rate_limiters = self
            .cfg
            .rate_limits
            .iter()
            .map(|(key, cfg)| {
                RateLimiter::with_clock(key.as_str(), *cfg, Arc::clone(&self.clock))
                    .map(|l| (key.clone(), Arc::new(l)))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        let groups = self
            .cfg
            .concurrency_groups
            .iter()
            .map(|(group, max)| {
                ConcurrencyLimiter::new(group.as_str(), *max).map(|l| (group.clone(), Arc::new(l)))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        let global = self
            .cfg
            .max_concurrent
            .map(|max| ConcurrencyLimiter::new(GLOBAL_POOL, max).map(Arc::new))
            .transpose()?;

        let subscribers = (!self.subscribers.is_empty()).then(|| {
            let set = Arc::new(SubscriberSet::new(self.subscribers));
            let tap = Arc::clone(&set);
            let id = bus.tap(move |ev| tap.emit(ev));
            Subscribers { id, set }
        });

        let pipeline = Arc::new(Pipeline::standard());
        debug!(
            stages = ?pipeline.names(),
            rate_limiters = rate_limiters.len(),
            groups = groups.len(),
            "orchestrator built"
        );

        Ok(Orchestrator {
            cfg: self.cfg,
            bus,
            clock: self.clock,
            pipeline,
            rate_limiters,
            groups,
            global,
            breakers: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(subscribers),
            registry: Registry::new(),
            tracker: TaskTracker::new(),
            runtime_token: CancellationToken::new(),
        })
    }
}
