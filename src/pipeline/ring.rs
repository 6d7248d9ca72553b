// SPDX-License-Identifier: GPL-3.0-only

//! Bounded frames-in-flight and the per-frame uniform ring
//!
//! The CPU may run ahead of the GPU by at most [`MAX_FRAMES_IN_FLIGHT`]
//! frames. Each frame owns one ring slot of the shared uniform buffer from
//! the moment its permit is acquired until the GPU reports the frame done.

use crate::constants::{MAX_FRAMES_IN_FLIGHT, aligned_uniform_size};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use tracing::trace;

struct LimiterShared {
    available: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

impl LimiterShared {
    fn release(&self) {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        *available = (*available + 1).min(self.capacity);
        self.released.notify_one();
    }
}

/// Counting semaphore limiting outstanding frames
#[derive(Clone)]
pub struct InFlightLimiter {
    shared: Arc<LimiterShared>,
}

impl InFlightLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(LimiterShared {
                available: Mutex::new(capacity),
                released: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Block until a slot is free
    pub fn acquire(&self, frame_index: u64) -> FramePermit {
        let mut available = self
            .shared
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *available == 0 {
            available = self
                .shared
                .released
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= 1;
        trace!(frame_index, available = *available, "Frame slot acquired");
        self.permit(frame_index)
    }

    /// Wait up to `timeout` for a slot
    pub fn acquire_timeout(&self, frame_index: u64, timeout: Duration) -> Option<FramePermit> {
        let available = self
            .shared
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (mut available, _) = self
            .shared
            .released
            .wait_timeout_while(available, timeout, |count| *count == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(self.permit(frame_index))
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self, frame_index: u64) -> Option<FramePermit> {
        let mut available = self
            .shared
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(self.permit(frame_index))
    }

    /// Frames acquired but not yet completed
    pub fn in_flight(&self) -> usize {
        let available = self
            .shared
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared.capacity - *available
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    fn permit(&self, frame_index: u64) -> FramePermit {
        FramePermit {
            frame_index,
            shared: Some(Arc::clone(&self.shared)),
        }
    }
}

impl Default for InFlightLimiter {
    fn default() -> Self {
        Self::new(MAX_FRAMES_IN_FLIGHT)
    }
}

/// Completion token for one in-flight frame
///
/// Completing (or dropping) the permit frees its slot exactly once. The
/// renderer moves the permit into the GPU work-done callback.
pub struct FramePermit {
    frame_index: u64,
    shared: Option<Arc<LimiterShared>>,
}

impl FramePermit {
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Signal that the GPU finished this frame
    pub fn complete(mut self) {
        if let Some(shared) = self.shared.take() {
            trace!(frame_index = self.frame_index, "Frame completed");
            shared.release();
        }
    }
}

impl Drop for FramePermit {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release();
        }
    }
}

impl std::fmt::Debug for FramePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePermit")
            .field("frame_index", &self.frame_index)
            .finish()
    }
}

/// One ring slot handed to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSlot {
    /// Frame counter value this slot was issued for
    pub frame_index: u64,
    /// Slot index, always `frame_index % slots`
    pub index: usize,
    /// Byte offset of the slot in the uniform buffer
    pub offset: u64,
}

/// Rotation of 256-byte aligned uniform slots
#[derive(Debug, Clone)]
pub struct UniformRing {
    slot_size: u64,
    slots: usize,
    frame_count: u64,
}

impl UniformRing {
    /// Ring for a uniform struct of `uniform_size` bytes
    pub fn new(uniform_size: u64, slots: usize) -> Self {
        Self {
            slot_size: aligned_uniform_size(uniform_size),
            slots: slots.max(1),
            frame_count: 0,
        }
    }

    /// Advance to the next slot: `(i + 1) mod slots`
    pub fn advance(&mut self) -> RingSlot {
        self.frame_count += 1;
        self.current()
    }

    /// Slot of the most recent frame
    pub fn current(&self) -> RingSlot {
        let index = (self.frame_count % self.slots as u64) as usize;
        RingSlot {
            frame_index: self.frame_count,
            index,
            offset: self.slot_size * index as u64,
        }
    }

    pub fn slot_size(&self) -> u64 {
        self.slot_size
    }

    /// Bytes needed for the whole ring
    pub fn total_size(&self) -> u64 {
        self.slot_size * self.slots as u64
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_ring_index_tracks_frame_count() {
        let mut ring = UniformRing::new(192, MAX_FRAMES_IN_FLIGHT);
        assert_eq!(ring.slot_size(), 256);
        assert_eq!(ring.total_size(), 768);

        for _ in 0..10 {
            let slot = ring.advance();
            assert_eq!(slot.index as u64, slot.frame_index % 3);
            assert_eq!(slot.offset, slot.index as u64 * 256);
        }
        assert_eq!(ring.frame_count(), 10);
    }

    #[test]
    fn test_try_acquire_stops_at_capacity() {
        let limiter = InFlightLimiter::default();
        let a = limiter.try_acquire(1).unwrap();
        let b = limiter.try_acquire(2).unwrap();
        let c = limiter.try_acquire(3).unwrap();
        assert!(limiter.try_acquire(4).is_none());
        assert_eq!(limiter.in_flight(), 3);

        b.complete();
        assert_eq!(limiter.in_flight(), 2);
        let d = limiter.try_acquire(4).unwrap();
        assert_eq!(d.frame_index(), 4);

        drop(a);
        drop(c);
        drop(d);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn test_acquire_timeout_without_release() {
        let limiter = InFlightLimiter::new(1);
        let _held = limiter.acquire(0);
        assert!(
            limiter
                .acquire_timeout(1, Duration::from_millis(20))
                .is_none()
        );
    }

    #[test]
    fn test_in_flight_never_exceeds_capacity() {
        let limiter = InFlightLimiter::default();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        // Producer submits frames; completion happens on other threads
        let mut workers = Vec::new();
        for frame in 0..60u64 {
            let permit = limiter.acquire(frame);
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            assert!(limiter.in_flight() <= MAX_FRAMES_IN_FLIGHT);

            let active = Arc::clone(&active);
            workers.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis((frame % 4) + 1));
                active.fetch_sub(1, Ordering::SeqCst);
                permit.complete();
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= MAX_FRAMES_IN_FLIGHT);
        assert_eq!(limiter.in_flight(), 0);
    }
}
