//! # Bounded-parallelism gate.
//!
//! [`ConcurrencyLimiter`] hands out at most `max` [`SlotPermit`]s. It sits on a
//! fair [`tokio::sync::Semaphore`]: waiters are served in arrival order and a
//! released permit goes straight to the head of the queue.
//!
//! ```text
//!   acquire() ──► [waiter queue, FIFO] ──► permit (RAII) ──► dropped on every exit path
//!                     │
//!                     └── cancel while queued: leaves the queue, never holds a permit
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, ExecError};

/// Worker slot held for the duration of one task; released on drop.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

/// Decrements the queued counter however the wait ends.
struct QueuedGuard<'a>(&'a AtomicUsize);

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// FIFO worker pool of `max` slots.
///
/// ## Example
/// ```rust
/// use taskgate::{ConcurrencyLimiter, ExecError};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = ConcurrencyLimiter::new("io", 2).unwrap();
/// let token = CancellationToken::new();
///
/// let out = pool.run(&token, async { Ok::<_, ExecError>(7) }).await.unwrap();
/// assert_eq!(out, 7);
/// assert_eq!(pool.active(), 0);
/// # }
/// ```
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    name: Arc<str>,
    max: usize,
    slots: Arc<Semaphore>,
    queued: AtomicUsize,
}

impl ConcurrencyLimiter {
    /// Creates a pool of `max` slots.
    ///
    /// # Errors
    /// [`ConfigError::InvalidMaxConcurrent`] if `max` is zero.
    pub fn new(name: impl Into<Arc<str>>, max: usize) -> Result<Self, ConfigError> {
        let name = name.into();
        if max == 0 {
            return Err(ConfigError::InvalidMaxConcurrent {
                group: name.to_string(),
            });
        }
        Ok(Self {
            name,
            max: max.min(Semaphore::MAX_PERMITS),
            slots: Arc::new(Semaphore::new(max.min(Semaphore::MAX_PERMITS))),
            queued: AtomicUsize::new(0),
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot count.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.max - self.slots.available_permits()
    }

    /// Callers waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Waits in line for a slot.
    ///
    /// # Errors
    /// [`ExecError::Canceled`] if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SlotPermit, ExecError> {
        if cancel.is_cancelled() {
            return Err(ExecError::Canceled);
        }
        let _queued = QueuedGuard::enter(&self.queued);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecError::Canceled),
            permit = Arc::clone(&self.slots).acquire_owned() => permit
                .map(|p| SlotPermit { _permit: p })
                .map_err(|_closed| ExecError::Canceled),
        }
    }

    /// Runs `fut` while holding a slot.
    ///
    /// # Errors
    /// [`ExecError::Canceled`] if cancelled while queued, otherwise whatever `fut` returns.
    pub async fn run<F, T>(&self, cancel: &CancellationToken, fut: F) -> Result<T, ExecError>
    where
        F: Future<Output = Result<T, ExecError>>,
    {
        let _slot = self.acquire(cancel).await?;
        fut.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn zero_slots_is_a_config_error() {
        assert_eq!(
            ConcurrencyLimiter::new("none", 0).unwrap_err(),
            ConfigError::InvalidMaxConcurrent {
                group: "none".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_slots() {
        let pool = Arc::new(ConcurrencyLimiter::new("bound", 3).unwrap());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let mut joins = Vec::new();
        for i in 0..12u64 {
            let (pool, running, peak, token) = (pool.clone(), running.clone(), peak.clone(), token.clone());
            joins.push(tokio::spawn(async move {
                pool.run(&token, async {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + i)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ExecError>(())
                })
                .await
            }));
        }
        for j in joins {
            j.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_served_in_arrival_order() {
        let pool = Arc::new(ConcurrencyLimiter::new("fifo", 1).unwrap());
        let order = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();

        let gate = pool.acquire(&token).await.unwrap();
        let mut joins = Vec::new();
        for i in 0..5 {
            let (pool, order, token) = (pool.clone(), order.clone(), token.clone());
            joins.push(tokio::spawn(async move {
                let _slot = pool.acquire(&token).await.unwrap();
                order.lock().unwrap().push(i);
            }));
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.queued(), 5);

        drop(gate);
        for j in joins {
            j.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_leaves_the_queue() {
        let pool = Arc::new(ConcurrencyLimiter::new("cancel", 1).unwrap());
        let held = pool.acquire(&CancellationToken::new()).await.unwrap();

        let token = CancellationToken::new();
        let waiter = {
            let (pool, token) = (pool.clone(), token.clone());
            tokio::spawn(async move { pool.acquire(&token).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        assert_eq!(pool.queued(), 1);

        token.cancel();
        assert!(waiter.await.unwrap().unwrap_err().is_canceled());
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.active(), 1);

        drop(held);
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn slot_is_released_on_error() {
        let pool = ConcurrencyLimiter::new("err", 1).unwrap();
        let token = CancellationToken::new();
        let res: Result<(), _> = pool
            .run(&token, async { Err(ExecError::Timeout { timeout: Duration::from_millis(1) }) })
            .await;
        assert!(res.is_err());
        assert_eq!(pool.active(), 0);
    }
}
