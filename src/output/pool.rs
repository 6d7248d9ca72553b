// SPDX-License-Identifier: GPL-3.0-only

//! Reusable buffer pool with an allocation threshold

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, warn};

struct PoolState<T> {
    free: Vec<T>,
    /// Buffers in existence: free plus checked out
    allocated: usize,
}

type Allocator<T> = Box<dyn Fn() -> Result<T, String> + Send + Sync>;

/// Pool of expensive buffers
///
/// `acquire` hands out a free buffer, or allocates a new one while fewer
/// than `threshold` exist. Buffers go back to the pool when their
/// [`Pooled`] handle is dropped, from any thread.
pub struct BufferPool<T> {
    state: Arc<Mutex<PoolState<T>>>,
    allocator: Allocator<T>,
    minimum: usize,
    threshold: usize,
}

impl<T: Send + 'static> BufferPool<T> {
    /// The threshold is raised to `minimum` if it is lower
    pub fn new<F>(minimum: usize, threshold: usize, allocator: F) -> Self
    where
        F: Fn() -> Result<T, String> + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                free: Vec::new(),
                allocated: 0,
            })),
            allocator: Box::new(allocator),
            minimum,
            threshold: threshold.max(minimum).max(1),
        }
    }

    pub fn minimum(&self) -> usize {
        self.minimum
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Buffers currently allocated
    pub fn allocated(&self) -> usize {
        self.lock().allocated
    }

    /// Buffers waiting in the pool
    pub fn available(&self) -> usize {
        self.lock().free.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a buffer, or `None` when allocating would exceed the threshold
    pub fn acquire(&self) -> Option<Pooled<T>> {
        {
            let mut state = self.lock();
            if let Some(item) = state.free.pop() {
                return Some(self.wrap(item));
            }
            if state.allocated >= self.threshold {
                return None;
            }
            // Reserve the slot; allocation happens outside the lock
            state.allocated += 1;
        }

        match (self.allocator)() {
            Ok(item) => Some(self.wrap(item)),
            Err(e) => {
                warn!(error = %e, "Failed to allocate pooled buffer");
                self.lock().allocated -= 1;
                None
            }
        }
    }

    /// Allocate until the threshold refuses, then return everything
    ///
    /// Returns the number of buffers now in the pool.
    pub fn preallocate(&self) -> usize {
        let mut held = Vec::new();
        while let Some(buffer) = self.acquire() {
            held.push(buffer);
        }
        let count = held.len();
        drop(held);
        debug!(count, threshold = self.threshold, "Buffer pool warmed up");
        self.available()
    }

    fn wrap(&self, item: T) -> Pooled<T> {
        Pooled {
            item: Some(item),
            pool: Arc::downgrade(&self.state),
        }
    }
}

/// A buffer checked out of a [`BufferPool`]
pub struct Pooled<T> {
    item: Option<T>,
    pool: Weak<Mutex<PoolState<T>>>,
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only taken in drop
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        let Some(item) = self.item.take() else {
            return;
        };
        // A pool that is gone just lets the buffer drop
        if let Some(state) = self.pool.upgrade() {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .free
                .push(item);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_pool(threshold: usize) -> (BufferPool<usize>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let pool = BufferPool::new(threshold, threshold, move || {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        });
        (pool, created)
    }

    #[test]
    fn test_preallocate_stops_at_threshold() {
        let (pool, created) = counting_pool(3);
        assert_eq!(pool.preallocate(), 3);
        assert_eq!(created.load(Ordering::SeqCst), 3);
        assert_eq!(pool.allocated(), 3);

        // Warm pool reuses instead of allocating
        let a = pool.acquire().unwrap();
        assert!(*a < 3);
        assert_eq!(created.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhausted_pool_returns_none() {
        let (pool, _) = counting_pool(2);
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());

        drop(a);
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn test_release_from_other_thread() {
        let (pool, _) = counting_pool(1);
        let buffer = pool.acquire().unwrap();
        std::thread::spawn(move || drop(buffer)).join().unwrap();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_failed_allocation_frees_reservation() {
        let pool: BufferPool<u8> = BufferPool::new(1, 1, || Err("out of memory".into()));
        assert!(pool.acquire().is_none());
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_threshold_never_below_minimum() {
        let pool = BufferPool::new(3, 1, || Ok(0u8));
        assert_eq!(pool.threshold(), 3);
        assert_eq!(pool.minimum(), 3);
    }
}
