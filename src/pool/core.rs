//! Pool implementation.
//!
//! All slot state lives behind one `parking_lot::Mutex` that is never held
//! across an `.await`. Construction runs in spawned tasks; each task carries
//! the slot generation it was started for and discards its result if the
//! slot was restarted meanwhile.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Delay before the first construction retry.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Upper bound for the construction retry delay.
const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// Slot constructor.
type Creator<T> = dyn Fn(PoolParams<T>) -> BoxFuture<'static, Result<T>> + Send + Sync;

/// Construction retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Delay before the first retry of a failed construction.
    pub retry_delay: Duration,
    /// Maximum delay between retries (doubling backoff).
    pub max_retry_delay: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }
}

/// Context handed to the constructor of one slot.
///
/// Resources that can die keep the [`WeakPool`] and call
/// [`WeakPool::restart`] with their `index` when they close.
pub struct PoolParams<T> {
    /// Slot index being constructed.
    pub index: usize,
    /// Handle back to the owning pool.
    pub pool: WeakPool<T>,
}

/// A resource taken out of the pool.
#[derive(Debug, Clone)]
pub struct PoolEntry<T> {
    /// Slot the resource was taken from.
    pub index: usize,
    /// The resource.
    pub value: T,
}

impl<T> PoolEntry<T> {
    /// Returns the resource.
    #[inline]
    pub fn into_inner(self) -> T {
        self.value
    }
}

enum SlotState<T> {
    Creating,
    Ready(T),
}

struct Slot<T> {
    state: SlotState<T>,
    generation: u64,
    failures: u32,
}

struct PoolInner<T> {
    capacity: usize,
    creator: Box<Creator<T>>,
    slots: Mutex<Vec<Slot<T>>>,
    ready: Notify,
    options: PoolOptions,
    closed: AtomicBool,
}

// ============================================================================
// Pool
// ============================================================================

/// Fixed-capacity pool of async resources.
///
/// Cloning a `Pool` clones a handle; all clones share the same slots.
///
/// # Example
///
/// ```ignore
/// let pool = Pool::new(3, |params| async move {
///     open_circuit(params.index).await
/// });
///
/// let entry = pool.take().await?;
/// ```
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Pool - Constructor
// ============================================================================

impl<T> Pool<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a pool and starts building every slot.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new<F, Fut>(capacity: usize, creator: F) -> Self
    where
        F: Fn(PoolParams<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::with_options(capacity, PoolOptions::default(), creator)
    }

    /// Creates a pool with custom retry settings.
    pub fn with_options<F, Fut>(capacity: usize, options: PoolOptions, creator: F) -> Self
    where
        F: Fn(PoolParams<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let creator: Box<Creator<T>> = Box::new(move |params| Box::pin(creator(params)));

        let slots = (0..capacity)
            .map(|_| Slot {
                state: SlotState::Creating,
                generation: 0,
                failures: 0,
            })
            .collect();

        let inner = Arc::new(PoolInner {
            capacity,
            creator,
            slots: Mutex::new(slots),
            ready: Notify::new(),
            options,
            closed: AtomicBool::new(false),
        });

        for index in 0..capacity {
            PoolInner::spawn_create(&inner, index, 0);
        }

        debug!(capacity, "Pool created");

        Self { inner }
    }
}

// ============================================================================
// Pool - Public API
// ============================================================================

impl<T> Pool<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Returns the fixed capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the number of slots currently ready.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.inner
            .slots
            .lock()
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Ready(_)))
            .count()
    }

    /// Takes a random ready resource out of the pool.
    ///
    /// The slot is rebuilt immediately, so two callers never receive the
    /// same resource. Waits until a slot is ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the pool is closed.
    pub async fn take(&self) -> Result<PoolEntry<T>> {
        loop {
            let notified = self.inner.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.try_take()? {
                return Ok(entry);
            }

            notified.await;
        }
    }

    /// Takes a random ready resource without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the pool is closed.
    pub fn try_take(&self) -> Result<Option<PoolEntry<T>>> {
        self.ensure_open()?;

        let (index, value, generation) = {
            let mut slots = self.inner.slots.lock();

            let ready: Vec<usize> = slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| matches!(slot.state, SlotState::Ready(_)))
                .map(|(index, _)| index)
                .collect();

            if ready.is_empty() {
                return Ok(None);
            }

            let index = ready[rand::thread_rng().gen_range(0..ready.len())];
            let slot = &mut slots[index];

            match mem::replace(&mut slot.state, SlotState::Creating) {
                SlotState::Ready(value) => {
                    slot.generation += 1;
                    (index, value, slot.generation)
                }
                SlotState::Creating => return Ok(None),
            }
        };

        trace!(index, "Pool entry taken");
        PoolInner::spawn_create(&self.inner, index, generation);

        Ok(Some(PoolEntry { index, value }))
    }

    /// Returns a shared handle to the resource of slot `index`.
    ///
    /// Unlike [`Pool::take`], the resource stays in the pool. Waits until
    /// the slot is ready.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the pool is closed
    /// - [`Error::Config`] if `index` is out of range
    pub async fn get(&self, index: usize) -> Result<T> {
        if index >= self.inner.capacity {
            return Err(Error::config(format!(
                "pool slot {index} out of range (capacity {})",
                self.inner.capacity
            )));
        }

        loop {
            let notified = self.inner.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_get(index)? {
                return Ok(value);
            }

            notified.await;
        }
    }

    /// Returns the resource of slot `index` if it is ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the pool is closed.
    pub fn try_get(&self, index: usize) -> Result<Option<T>> {
        self.ensure_open()?;

        let slots = self.inner.slots.lock();
        Ok(slots.get(index).and_then(|slot| match &slot.state {
            SlotState::Ready(value) => Some(value.clone()),
            SlotState::Creating => None,
        }))
    }

    /// Disposes slot `index` and rebuilds it with the original constructor.
    pub fn restart(&self, index: usize) {
        PoolInner::restart(&self.inner, index);
    }

    /// Returns a weak handle that does not keep the pool alive.
    #[inline]
    #[must_use]
    pub fn downgrade(&self) -> WeakPool<T> {
        WeakPool {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Closes the pool, dropping every ready resource.
    ///
    /// Pending and future `take`/`get` calls fail.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let dropped: Vec<Slot<T>> = mem::take(&mut *self.inner.slots.lock());
        drop(dropped);

        self.inner.ready.notify_waiters();
        debug!(capacity = self.inner.capacity, "Pool closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }
}

// ============================================================================
// PoolInner - Construction
// ============================================================================

impl<T> PoolInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn restart(this: &Arc<Self>, index: usize) {
        if this.closed.load(Ordering::SeqCst) {
            return;
        }

        let (previous, generation) = {
            let mut slots = this.slots.lock();
            let Some(slot) = slots.get_mut(index) else {
                warn!(index, "Restart of unknown pool slot");
                return;
            };
            slot.generation += 1;
            (
                mem::replace(&mut slot.state, SlotState::Creating),
                slot.generation,
            )
        };

        // Dispose outside the lock.
        drop(previous);

        debug!(index, generation, "Pool slot restarting");
        Self::spawn_create(this, index, generation);
    }

    fn is_current(&self, index: usize, generation: u64) -> bool {
        self.slots
            .lock()
            .get(index)
            .is_some_and(|slot| slot.generation == generation)
    }

    fn spawn_create(this: &Arc<Self>, index: usize, generation: u64) {
        let weak = Arc::downgrade(this);

        tokio::spawn(async move {
            let mut delay = None;

            loop {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }

                let future = {
                    let Some(inner) = weak.upgrade() else { return };
                    if inner.closed.load(Ordering::SeqCst) || !inner.is_current(index, generation)
                    {
                        return;
                    }
                    (inner.creator)(PoolParams {
                        index,
                        pool: WeakPool {
                            inner: weak.clone(),
                        },
                    })
                };

                let result = future.await;

                let Some(inner) = weak.upgrade() else { return };
                let mut slots = inner.slots.lock();
                let Some(slot) = slots.get_mut(index) else { return };

                if slot.generation != generation {
                    trace!(index, generation, "Discarding superseded pool construction");
                    return;
                }

                match result {
                    Ok(value) => {
                        slot.state = SlotState::Ready(value);
                        slot.failures = 0;
                        drop(slots);
                        inner.ready.notify_waiters();
                        debug!(index, generation, "Pool slot ready");
                        return;
                    }
                    Err(e) => {
                        slot.failures += 1;
                        let failures = slot.failures;
                        drop(slots);

                        let next = delay
                            .map(|d: Duration| d * 2)
                            .unwrap_or(inner.options.retry_delay)
                            .min(inner.options.max_retry_delay);
                        delay = Some(next);

                        warn!(index, failures, error = %e, retry_ms = next.as_millis() as u64, "Pool slot construction failed");
                    }
                }
            }
        });
    }
}

// ============================================================================
// WeakPool
// ============================================================================

/// Non-owning handle to a [`Pool`].
pub struct WeakPool<T> {
    inner: Weak<PoolInner<T>>,
}

impl<T> Clone for WeakPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for WeakPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPool").finish_non_exhaustive()
    }
}

impl<T> WeakPool<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Restarts slot `index` if the pool is still alive.
    pub fn restart(&self, index: usize) {
        if let Some(inner) = self.inner.upgrade() {
            PoolInner::restart(&inner, index);
        }
    }

    /// Upgrades to a strong handle.
    #[must_use]
    pub fn upgrade(&self) -> Option<Pool<T>> {
        self.inner.upgrade().map(|inner| Pool { inner })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    use tokio_test::{assert_pending, assert_ready_ok, task};

    fn counting_pool(capacity: usize) -> (Pool<usize>, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let pool = Pool::new(capacity, move |_params| {
            let counter = Arc::clone(&counter_clone);
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
        });
        (pool, counter)
    }

    #[tokio::test]
    async fn test_take_refills_slot() -> anyhow::Result<()> {
        let (pool, counter) = counting_pool(1);

        let first = pool.take().await?;
        let second = pool.take().await?;

        assert_ne!(first.value, second.value);
        assert_eq!(first.index, 0);
        assert!(counter.load(Ordering::SeqCst) >= 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_take_waits_for_ready_slot() -> anyhow::Result<()> {
        let gate = Arc::new(Notify::new());
        let gate_clone = Arc::clone(&gate);
        let pool: Pool<usize> = Pool::new(1, move |params: PoolParams<usize>| {
            let gate = Arc::clone(&gate_clone);
            async move {
                gate.notified().await;
                Ok(params.index)
            }
        });

        let mut take = task::spawn(pool.take());
        assert_pending!(take.poll());
        assert!(pool.try_take()?.is_none());

        gate.notify_one();
        while pool.ready_count() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(take.is_woken());
        let entry = assert_ready_ok!(take.poll());
        assert_eq!(entry.index, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_takes_are_distinct() {
        let (pool, _) = counting_pool(3);

        let mut handles = Vec::new();
        for _ in 0..30 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.take().await }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let entry = handle.await.expect("join").expect("take");
            assert!(seen.insert(entry.value), "value handed out twice");
        }
        assert_eq!(seen.len(), 30);
    }

    #[tokio::test]
    async fn test_failed_construction_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let options = PoolOptions {
            retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(4),
        };

        let pool = Pool::with_options(1, options, move |_params| {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(Error::circuit("not yet"))
                } else {
                    Ok(attempt)
                }
            }
        });

        let entry = pool.take().await.expect("take");
        assert_eq!(entry.value, 3);
        assert_eq!(pool.capacity(), 1);
    }

    #[tokio::test]
    async fn test_restart_replaces_resource() {
        let (pool, _) = counting_pool(1);

        let before = pool.get(0).await.expect("get");
        pool.restart(0);
        let after = pool.get(0).await.expect("get");

        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_get_does_not_remove() {
        let (pool, _) = counting_pool(1);

        let a = pool.get(0).await.expect("get");
        let b = pool.get(0).await.expect("get");
        assert_eq!(a, b);
        assert_eq!(pool.ready_count(), 1);
    }

    #[tokio::test]
    async fn test_get_out_of_range() {
        let (pool, _) = counting_pool(1);
        assert!(matches!(pool.get(5).await, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_weak_restart_from_resource() {
        let pool: Pool<usize> = Pool::new(1, |params: PoolParams<usize>| async move {
            Ok(params.index)
        });
        let weak = pool.downgrade();

        pool.get(0).await.expect("get");
        weak.restart(0);
        assert_eq!(pool.get(0).await.expect("get"), 0);
        assert!(weak.upgrade().is_some());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_take() {
        let (pool, _) = counting_pool(2);
        pool.close();
        assert!(matches!(pool.take().await, Err(Error::ConnectionClosed)));
    }
}
