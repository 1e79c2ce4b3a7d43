//! # Orchestrator-wide configuration.
//!
//! [`OrchestratorConfig`] is used in two ways:
//! 1. **Orchestrator creation**: `Orchestrator::builder(config).build()`
//! 2. **Task defaults**: `TaskOptions::with_defaults(&config)`
//!
//! ## Sentinel values
//! - `max_concurrent = None` → no orchestrator-wide cap
//! - `timeout = 0s` → no default deadline
//! - `cancel_grace = 0s` → cancelled tasks are reported immediately
//! - `max_listeners = 0` → no listener-leak warning

use std::collections::HashMap;
use std::time::Duration;

use crate::control::RateLimitConfig;
use crate::error::ConfigError;
use crate::events::DEFAULT_MAX_LISTENERS;
use crate::policies::BackoffPolicy;

/// Key under which the orchestrator-wide pool is reported.
pub(crate) const GLOBAL_POOL: &str = "global";

/// Global configuration for the orchestrator.
///
/// ## Field semantics
/// - `max_concurrent`: cap on tasks holding a worker slot, for tasks without a group
/// - `concurrency_groups`: named pools; a task in a group uses that pool instead
/// - `rate_limits`: named sliding windows tasks can opt into
/// - `backoff`: default retry backoff for `TaskOptions::with_defaults`
/// - `timeout`: default per-attempt deadline (`0s` = none)
/// - `cancel_grace`: how long a cancelled body may take to return
/// - `shutdown_grace`: how long `shutdown` waits for in-flight tasks
/// - `max_listeners`: soft cap per event before a leak warning (`0` = off)
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use taskgate::{OrchestratorConfig, RateLimitConfig};
///
/// let mut cfg = OrchestratorConfig::default();
/// cfg.max_concurrent = Some(8);
/// cfg.rate_limits.insert("api".into(), RateLimitConfig::new(10, Duration::from_secs(1)));
/// cfg.concurrency_groups.insert("db".into(), 2);
///
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Orchestrator-wide slot count (`None` = unlimited, `Some(0)` is invalid).
    pub max_concurrent: Option<usize>,
    /// Named worker pools (each size must be > 0).
    pub concurrency_groups: HashMap<String, usize>,
    /// Named rate limiters.
    pub rate_limits: HashMap<String, RateLimitConfig>,
    /// Default backoff policy for retries.
    pub backoff: BackoffPolicy,
    /// Default per-attempt deadline (`Duration::ZERO` = none).
    pub timeout: Duration,
    /// Grace given to a cancelled body before it is dropped.
    pub cancel_grace: Duration,
    /// Maximum time `shutdown` waits for in-flight tasks.
    pub shutdown_grace: Duration,
    /// Soft cap on listeners per event name.
    pub max_listeners: usize,
}

impl OrchestratorConfig {
    /// Returns the default per-attempt deadline as an `Option`.
    #[inline]
    pub fn default_timeout(&self) -> Option<Duration> {
        if self.timeout.is_zero() {
            None
        } else {
            Some(self.timeout)
        }
    }

    /// Checks every limit eagerly.
    ///
    /// # Errors
    /// The first invalid setting found, as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == Some(0) {
            return Err(ConfigError::InvalidMaxConcurrent {
                group: GLOBAL_POOL.into(),
            });
        }
        for (group, max) in &self.concurrency_groups {
            if *max == 0 {
                return Err(ConfigError::InvalidMaxConcurrent {
                    group: group.clone(),
                });
            }
        }
        for (key, cfg) in &self.rate_limits {
            cfg.validate(key)?;
        }
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    /// Default configuration:
    ///
    /// - `max_concurrent = None` (unlimited)
    /// - no groups, no rate limiters
    /// - `backoff = BackoffPolicy::default()` (100ms doubling, no jitter)
    /// - `timeout = 0s` (no deadline)
    /// - `cancel_grace = 5s`
    /// - `shutdown_grace = 30s`
    /// - `max_listeners = 10`
    fn default() -> Self {
        Self {
            max_concurrent: None,
            concurrency_groups: HashMap::new(),
            rate_limits: HashMap::new(),
            backoff: BackoffPolicy::default(),
            timeout: Duration::ZERO,
            cancel_grace: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(30),
            max_listeners: DEFAULT_MAX_LISTENERS,
        }
    }
}
