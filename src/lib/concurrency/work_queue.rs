//! Bounded many-to-one work queue with termination and restart.
//!
//! This is the queue that sits in front of every pipeline node. Producers
//! block when the queue is at capacity, consumers block when it is empty,
//! and `terminate` closes the queue so consumers drain what remains and
//! then observe end-of-input. A terminated queue can be re-armed with
//! `restart`, which is what allows a pipeline to process several input
//! files in one process.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

struct QueueState<T> {
    items: VecDeque<T>,
    terminated: bool,
}

/// A bounded MPMC queue with capacity-based backpressure.
///
/// # Ordering
///
/// Messages are FIFO per producer; interleaving across producers is
/// unspecified. At steady state the queue size never exceeds the configured
/// capacity, and no message is delivered twice.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    // Approximate size mirror so sample_stats never takes the queue lock.
    size_hint: AtomicUsize,
    high_water: AtomicUsize,
}

impl<T> WorkQueue<T> {
    /// Create a queue that holds at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "work queue capacity must be non-zero");
        Self {
            state: Mutex::new(QueueState { items: VecDeque::with_capacity(capacity), terminated: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            size_hint: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    /// Push an item, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the rejected item if the queue has been terminated, either
    /// before the call or while blocked waiting for space.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        loop {
            if state.terminated {
                return Err(item);
            }
            if state.items.len() < self.capacity {
                break;
            }
            self.not_full.wait(&mut state);
        }
        state.items.push_back(item);
        let size = state.items.len();
        self.size_hint.store(size, Ordering::Relaxed);
        self.high_water.fetch_max(size, Ordering::Relaxed);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop the next item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue has been terminated and drained; this
    /// is the only exit condition for node worker loops.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.size_hint.store(state.items.len(), Ordering::Relaxed);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.terminated {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Pop without blocking.
    ///
    /// Returns `None` when the queue is currently empty, terminated or not.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            self.size_hint.store(state.items.len(), Ordering::Relaxed);
            self.not_full.notify_one();
        }
        item
    }

    /// Close the queue.
    ///
    /// Subsequent `try_push` calls are rejected immediately; `pop` drains
    /// the remaining items and then returns `None`. Blocked producers and
    /// consumers are woken.
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        state.terminated = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Re-arm a terminated queue so it accepts new items.
    ///
    /// Restart requires termination to have completed: the caller must have
    /// observed `pop` returning `None` (queue drained, workers exited)
    /// before re-arming.
    pub fn restart(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.items.is_empty(), "restart on a queue with undrained items");
        state.terminated = false;
    }

    /// Whether the queue has been terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Current number of queued items (lock-free approximation).
    #[must_use]
    pub fn len(&self) -> usize {
        self.size_hint.load(Ordering::Relaxed)
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest size observed since construction.
    #[must_use]
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }
}
