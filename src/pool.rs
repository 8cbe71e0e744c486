//! Lock-free pool of reusable scratch objects.
//!
//! Hot-path scratch values (decode targets, serialization buffers) are
//! borrowed with [`Pool::acquire`] and handed back automatically when the
//! returned [`Pooled`] guard drops, on every exit path including early
//! returns through `?`. When the pool is empty a fresh object is built by
//! the factory; when it is full on release the object is dropped.
//!
//! Correctness never depends on pooling: every released object is
//! [`Reset`] before it can be handed out again.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

/// Clears an object back to a reusable state.
pub trait Reset {
    fn reset(&mut self);
}

impl Reset for BytesMut {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T> Reset for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Fixed-capacity object pool backed by a lock-free queue.
pub struct Pool<T: Reset> {
    queue: ArrayQueue<T>,
    factory: Factory<T>,
    stats: PoolStats,
}

/// Counters for pool monitoring.
#[derive(Debug, Default)]
pub struct PoolStats {
    hits: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
    drops: AtomicU64,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub returns: u64,
    pub drops: u64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

impl<T: Reset> Pool<T> {
    /// Creates a pool holding up to `size` objects, pre-filled by `factory`.
    ///
    /// A `size` of zero is bumped to one.
    pub fn new(size: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let queue = ArrayQueue::new(size.max(1));
        for _ in 0..queue.capacity() {
            let _ = queue.push(factory());
        }

        Self {
            queue,
            factory: Box::new(factory),
            stats: PoolStats::default(),
        }
    }

    /// Takes an object from the pool, building a new one if it is empty.
    #[inline]
    pub fn acquire(&self) -> Pooled<'_, T> {
        let item = match self.queue.pop() {
            Some(item) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        };

        Pooled {
            pool: self,
            item: Some(item),
        }
    }

    fn release(&self, mut item: T) {
        item.reset();
        match self.queue.push(item) {
            Ok(()) => {
                self.stats.returns.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of idle objects currently in the pool.
    #[inline]
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of idle objects the pool retains.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    #[inline]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

/// Scoped loan of a pooled object. Returned to the pool on drop.
pub struct Pooled<'a, T: Reset> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T: Reset> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only taken in `drop`.
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after release"),
        }
    }
}

impl<T: Reset> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after release"),
        }
    }
}

impl<T: Reset> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
