//! # Example: guarded_pipeline
//!
//! Drives a burst of calls against a flaky upstream through every gate:
//! a rate window of 5 calls per second, a breaker that opens after 3
//! failures, at most 2 calls in flight, one retry and a 300ms deadline.
//!
//! ## Flow
//! ```text
//! submit × 12
//!   └─► RateLimit(5/s) ─► Circuit("upstream") ─► Concurrency(2) ─► Retry(1) ─► Timeout(300ms) ─► call
//!
//! listeners print:
//!   rate:limited          a call waited for the window
//!   circuit:open/closed   breaker transitions
//!   task:timeout          an attempt overran its deadline
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example guarded_pipeline
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use taskgate::{
    CircuitBreakerConfig, EventKind, OpFn, Orchestrator, OrchestratorConfig, RateLimitConfig,
    TaskError, TaskOptions,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut cfg = OrchestratorConfig::default();
    cfg.max_concurrent = Some(2);
    cfg.rate_limits
        .insert("upstream".into(), RateLimitConfig::new(5, Duration::from_secs(1)));
    cfg.shutdown_grace = Duration::from_secs(5);

    let orch = Orchestrator::builder(cfg).build()?;

    for kind in [
        EventKind::RateLimited,
        EventKind::CircuitOpen,
        EventKind::CircuitHalfOpen,
        EventKind::CircuitClosed,
        EventKind::TaskTimeout,
    ] {
        orch.on(kind, move |ev| {
            println!("[{kind}] {} {}", ev.name.as_deref().unwrap_or(""), ev.reason.as_deref().unwrap_or(""));
        });
    }

    // Every third call hangs past the deadline, every fifth fails outright.
    let calls = Arc::new(AtomicU32::new(0));
    let call_upstream = {
        let calls = Arc::clone(&calls);
        move |ctx: CancellationToken| {
            let n = calls.fetch_add(1, Ordering::Relaxed);
            async move {
                if n % 5 == 4 {
                    return Err(TaskError::fatal(format!("call {n}: 500 internal error")));
                }
                let latency = if n % 3 == 2 { Duration::from_secs(2) } else { Duration::from_millis(50) };
                tokio::select! {
                    _ = ctx.cancelled() => Err(TaskError::Canceled),
                    _ = sleep(latency) => Ok(n),
                }
            }
        }
    };

    let opts = TaskOptions::new()
        .with_rate_limiter("upstream")
        .with_circuit_breaker("upstream", CircuitBreakerConfig::new(3, Duration::from_secs(1)))
        .with_retries(1)
        .with_base_delay(Duration::from_millis(50))
        .with_timeout(Duration::from_millis(300));

    let mut handles = Vec::new();
    for i in 0..12 {
        let op = OpFn::new(format!("request-{i}"), call_upstream.clone());
        handles.push(orch.submit(op, opts.clone())?);
    }

    let (mut ok, mut failed) = (0, 0);
    for h in handles {
        let name = h.name().to_string();
        match h.await {
            Ok(n) => {
                ok += 1;
                info!(task = %name, call = n, "request succeeded");
            }
            Err(e) => {
                failed += 1;
                info!(task = %name, error = %e.error, label = e.as_label(), "request failed");
            }
        }
    }

    if let Some(breaker) = orch.circuit_breaker("upstream") {
        let snap = breaker.snapshot();
        println!("[main] breaker state={} snapshot={snap:?}", snap.state.as_str());
    }
    println!("[main] ok={ok} failed={failed}");

    orch.shutdown().await?;
    Ok(())
}
