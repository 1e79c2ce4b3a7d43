//! # Example: retry_with_backoff
//!
//! Shows how a failing operation is re-run according to its retry policy.
//! The operation fails twice before succeeding; every retry is published as a
//! `task:retry` event carrying the upcoming attempt and the backoff delay.
//!
//! ## Flow
//! ```text
//! submit(flaky, retries=3, base_delay=100ms)
//!   ├─► task:queued
//!   ├─► task:started{attempt=0} → Err("boom #1")
//!   ├─► task:retry{attempt=1, delay=100ms}
//!   ├─► task:started{attempt=1} → Err("boom #2")
//!   ├─► task:retry{attempt=2, delay≈200ms}
//!   ├─► task:started{attempt=2} → Ok
//!   └─► task:succeeded
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=taskgate=debug cargo run --example retry_with_backoff
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use taskgate::{
    BackoffPolicy, EventKind, JitterPolicy, LogWriter, OpFn, Orchestrator, OrchestratorConfig,
    Subscribe, TaskError, TaskOptions,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

static CALLS: AtomicU32 = AtomicU32::new(0);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Orchestrator with the logging subscriber attached
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
    let orch = Orchestrator::builder(OrchestratorConfig::default())
        .with_subscribers(subs)
        .build()?;

    orch.on(EventKind::TaskRetry, |ev| {
        println!(
            "[retry] attempt={} delay={}ms reason={}",
            ev.attempt.unwrap_or(0),
            ev.delay_ms.unwrap_or(0),
            ev.reason.as_deref().unwrap_or("")
        );
    });

    // 2. An operation that fails twice
    let flaky = OpFn::new("flaky", |ctx: CancellationToken| async move {
        let call = CALLS.fetch_add(1, Ordering::Relaxed) + 1;
        if ctx.is_cancelled() {
            return Err(TaskError::Canceled);
        }
        if call <= 2 {
            println!("[flaky] simulated failure #{call}");
            Err(TaskError::fail(format!("boom #{call}")))
        } else {
            println!("[flaky] success on call {call}");
            Ok(call)
        }
    });

    // 3. Exponential backoff with equal jitter
    let backoff = BackoffPolicy {
        first: Duration::from_millis(100),
        max: Duration::from_secs(2),
        factor: 2.0,
        jitter: JitterPolicy::Equal,
    };
    let opts = TaskOptions::new().with_retries(3).with_backoff(backoff);

    // 4. Submit and wait
    let handle = orch.submit(flaky, opts)?;
    let calls = handle.await?;
    println!("[main] succeeded after {calls} calls");

    orch.shutdown().await?;
    Ok(())
}
