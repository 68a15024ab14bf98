//! Runtime pool
//!
//! A bounded cache of interchangeable engine instances shared by concurrent
//! callers. Acquisition prefers reusing an idle instance, then creating a new
//! one while under `max_size`, and only blocks when the pool is saturated.
//!
//! A background reclaimer trims idle instances down to `min_size` on a fixed
//! interval. Its stop signal is the pool's shutdown, so it never outlives the
//! pool.

use crate::config::{ConfigError, PoolConfig};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Builds fresh instances for a [`RuntimePool`].
pub trait InstanceFactory: Send + Sync + 'static {
    type Instance: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn create(&self) -> Result<Self::Instance, Self::Error>;
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to create runtime: {0}")]
    Create(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to start pool reclaimer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("runtime pool is shut down")]
    ShutDown,

    #[error("timed out after {0:?} waiting for an idle runtime")]
    Timeout(Duration),
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub live: usize,
    pub idle: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub shut_down: bool,
}

struct IdleState<T> {
    items: VecDeque<T>,
    /// Bumped every time an instance is discarded, so saturated waiters
    /// know capacity was freed and creation may succeed again.
    freed: u64,
    closed: bool,
}

/// Bounded FIFO of ready instances with its own lock.
struct IdleQueue<T> {
    state: Mutex<IdleState<T>>,
    available: Condvar,
    capacity: usize,
}

enum Wait<T> {
    Ready(T),
    Retry,
}

/// When a bounded acquire gives up, and the timeout it was asked for.
#[derive(Clone, Copy)]
struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl<T> IdleQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(IdleState {
                items: VecDeque::with_capacity(capacity),
                freed: 0,
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Hands the item back when the queue is full or closed.
    fn try_push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed || state.items.len() >= self.capacity {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn freed(&self) -> u64 {
        self.state.lock().freed
    }

    fn mark_freed(&self) {
        self.state.lock().freed += 1;
        self.available.notify_all();
    }

    /// Blocks until an item shows up, capacity is freed after `seen_freed`,
    /// the queue closes, or `deadline` passes.
    fn wait(&self, seen_freed: u64, deadline: Option<Deadline>) -> Result<Wait<T>, PoolError> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(Wait::Ready(item));
            }
            if state.closed {
                return Err(PoolError::ShutDown);
            }
            if state.freed != seen_freed {
                return Ok(Wait::Retry);
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline.at).timed_out()
                        && state.items.is_empty()
                        && !state.closed
                    {
                        return Err(PoolError::Timeout(deadline.timeout));
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    fn close_and_drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.closed = true;
        let drained = state.items.drain(..).collect();
        drop(state);
        self.available.notify_all();
        drained
    }

    fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

struct Shared<F: InstanceFactory> {
    factory: F,
    idle: IdleQueue<F::Instance>,
    live: Mutex<usize>,
    min_size: usize,
    max_size: usize,
    closed: AtomicBool,
    stop: Mutex<bool>,
    stop_signal: Condvar,
}

impl<F: InstanceFactory> Shared<F> {
    fn release(&self, instance: F::Instance) {
        match self.idle.try_push(instance) {
            Ok(()) => tracing::trace!("runtime returned to pool"),
            Err(instance) => self.discard(instance),
        }
    }

    fn discard(&self, instance: F::Instance) {
        drop(instance);
        {
            let mut live = self.live.lock();
            *live = live.saturating_sub(1);
            tracing::debug!(live = *live, "discarded runtime");
        }
        self.idle.mark_freed();
    }

    fn reclaim(&self) -> usize {
        let mut removed = Vec::new();
        {
            let mut live = self.live.lock();
            let excess = live.saturating_sub(self.min_size);
            while removed.len() < excess {
                match self.idle.try_pop() {
                    Some(instance) => removed.push(instance),
                    None => break,
                }
            }
            *live -= removed.len();
            if !removed.is_empty() {
                tracing::debug!(removed = removed.len(), live = *live, "reclaimed idle runtimes");
            }
        }
        let count = removed.len();
        drop(removed);
        if count > 0 {
            self.idle.mark_freed();
        }
        count
    }

    fn run_reclaimer(&self, interval: Duration) {
        let mut stopped = self.stop.lock();
        while !*stopped {
            let timed_out = self.stop_signal.wait_for(&mut stopped, interval).timed_out();
            if *stopped {
                break;
            }
            if timed_out {
                tracing::trace!("reclaim tick");
                parking_lot::MutexGuard::unlocked(&mut stopped, || {
                    self.reclaim();
                });
            }
        }
        tracing::debug!("pool reclaimer stopped");
    }
}

/// Bounded, self-trimming pool of engine instances.
///
/// Construct one per service and share it behind an [`Arc`]. Dropping the
/// pool shuts it down.
pub struct RuntimePool<F: InstanceFactory> {
    shared: Arc<Shared<F>>,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

impl<F: InstanceFactory> RuntimePool<F> {
    /// Validates `config`, pre-warms `min_size` instances and starts the
    /// background reclaimer.
    pub fn new(factory: F, config: &PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            factory,
            idle: IdleQueue::new(config.max_size),
            live: Mutex::new(0),
            min_size: config.min_size,
            max_size: config.max_size,
            closed: AtomicBool::new(false),
            stop: Mutex::new(false),
            stop_signal: Condvar::new(),
        });

        for _ in 0..config.min_size {
            let instance = shared
                .factory
                .create()
                .map_err(|err| PoolError::Create(Box::new(err)))?;
            *shared.live.lock() += 1;
            // Capacity is max_size >= min_size, so this cannot overflow.
            if let Err(instance) = shared.idle.try_push(instance) {
                shared.discard(instance);
            }
        }

        let interval = config.reclaim_interval();
        let reclaimer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("runtime-pool-reclaimer".into())
                .spawn(move || shared.run_reclaimer(interval))
                .map_err(PoolError::Spawn)?
        };

        tracing::info!(
            min_size = config.min_size,
            max_size = config.max_size,
            reclaim_interval = ?interval,
            "runtime pool started"
        );

        Ok(Self {
            shared,
            reclaimer: Mutex::new(Some(reclaimer)),
        })
    }

    /// Check out an instance, blocking while the pool is saturated.
    ///
    /// Fails only when a brand-new instance cannot be built or the pool is
    /// shut down.
    pub fn acquire(&self) -> Result<PooledInstance<'_, F>, PoolError> {
        self.acquire_until(None)
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout` when no
    /// instance becomes available.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<PooledInstance<'_, F>, PoolError> {
        self.acquire_until(Some(Deadline {
            at: Instant::now() + timeout,
            timeout,
        }))
    }

    fn acquire_until(
        &self,
        deadline: Option<Deadline>,
    ) -> Result<PooledInstance<'_, F>, PoolError> {
        let shared = &*self.shared;
        loop {
            if shared.closed.load(Ordering::Acquire) {
                return Err(PoolError::ShutDown);
            }

            if let Some(instance) = shared.idle.try_pop() {
                tracing::trace!("reusing idle runtime");
                return Ok(self.lease(instance));
            }

            // Read before the capacity check so a discard racing with it
            // still wakes us below.
            let seen_freed = shared.idle.freed();

            let reserved = {
                let mut live = shared.live.lock();
                if *live < shared.max_size {
                    *live += 1;
                    true
                } else {
                    false
                }
            };

            if reserved {
                return match shared.factory.create() {
                    Ok(instance) => {
                        tracing::debug!("created runtime");
                        Ok(self.lease(instance))
                    }
                    Err(err) => {
                        {
                            let mut live = shared.live.lock();
                            *live = live.saturating_sub(1);
                        }
                        shared.idle.mark_freed();
                        tracing::warn!(error = %err, "failed to create runtime");
                        Err(PoolError::Create(Box::new(err)))
                    }
                };
            }

            tracing::trace!("pool saturated, waiting for a runtime");
            match shared.idle.wait(seen_freed, deadline)? {
                Wait::Ready(instance) => return Ok(self.lease(instance)),
                Wait::Retry => continue,
            }
        }
    }

    fn lease(&self, instance: F::Instance) -> PooledInstance<'_, F> {
        PooledInstance {
            instance: ManuallyDrop::new(instance),
            pool: self,
        }
    }

    /// Return an instance to the idle queue, or discard it when the queue
    /// has no room. Never blocks.
    pub fn release(&self, instance: F::Instance) {
        self.shared.release(instance);
    }

    /// Drop idle instances beyond `min_size`. Returns how many were removed.
    pub fn reclaim(&self) -> usize {
        self.shared.reclaim()
    }

    /// Stop the reclaimer and discard every idle instance.
    ///
    /// Instances still checked out are not recalled; they are discarded when
    /// their lease is dropped. Blocked acquirers fail with
    /// [`PoolError::ShutDown`].
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        *self.shared.stop.lock() = true;
        self.shared.stop_signal.notify_all();
        if let Some(handle) = self.reclaimer.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("pool reclaimer panicked");
            }
        }

        let drained = {
            let mut live = self.shared.live.lock();
            let drained = self.shared.idle.close_and_drain();
            *live = 0;
            drained
        };
        tracing::info!(discarded = drained.len(), "runtime pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        let live = *self.shared.live.lock();
        PoolStats {
            live,
            idle: self.shared.idle.len(),
            min_size: self.shared.min_size,
            max_size: self.shared.max_size,
            shut_down: self.shared.closed.load(Ordering::Acquire),
        }
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }
}

impl<F: InstanceFactory> Drop for RuntimePool<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exclusive lease on a pooled instance. Returned to the pool on drop.
pub struct PooledInstance<'a, F: InstanceFactory> {
    instance: ManuallyDrop<F::Instance>,
    pool: &'a RuntimePool<F>,
}

impl<F: InstanceFactory> PooledInstance<'_, F> {
    /// Throw the instance away instead of returning it, freeing its slot.
    pub fn discard(self) {
        let mut lease = ManuallyDrop::new(self);
        // SAFETY: `lease` is never dropped, so the instance is taken exactly
        // once, here.
        let instance = unsafe { ManuallyDrop::take(&mut lease.instance) };
        lease.pool.shared.discard(instance);
    }
}

impl<F: InstanceFactory> Deref for PooledInstance<'_, F> {
    type Target = F::Instance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl<F: InstanceFactory> DerefMut for PooledInstance<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.instance
    }
}

impl<F: InstanceFactory> Drop for PooledInstance<'_, F> {
    fn drop(&mut self) {
        // SAFETY: `discard` bypasses this drop, so the instance is still here
        // and is not touched again after being taken.
        let instance = unsafe { ManuallyDrop::take(&mut self.instance) };
        self.pool.release(instance);
    }
}
