//! Flag and latch signalling primitives.
//!
//! These are the small blocking building blocks used by the task executor
//! and the pipeline shutdown protocol: a one-shot [`Flag`] that threads can
//! wait on, and a counting [`Latch`] that releases waiters once it reaches
//! zero.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// A one-shot boolean signal.
///
/// `signal` releases all current and future waiters. Signalling more than
/// once is allowed and has no further effect.
#[derive(Default)]
pub struct Flag {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl Flag {
    /// Create an unsignalled flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake all waiters.
    pub fn signal(&self) {
        let mut signalled = self.state.lock();
        *signalled = true;
        self.condvar.notify_all();
    }

    /// Block until the flag is signalled.
    pub fn wait(&self) {
        let mut signalled = self.state.lock();
        while !*signalled {
            self.condvar.wait(&mut signalled);
        }
    }

    /// Block until the flag is signalled or the timeout elapses.
    ///
    /// Returns `true` if the flag was signalled.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut signalled = self.state.lock();
        if *signalled {
            return true;
        }
        self.condvar.wait_for(&mut signalled, timeout);
        *signalled
    }

    /// Check the flag without blocking.
    #[must_use]
    pub fn is_signalled(&self) -> bool {
        *self.state.lock()
    }
}

/// A count-down latch.
///
/// Created with a count; `count_down` decrements it and `wait` blocks until
/// the count reaches zero. Counting down past zero is a no-op.
pub struct Latch {
    count: Mutex<usize>,
    condvar: Condvar,
}

impl Latch {
    /// Create a latch with the given initial count.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self { count: Mutex::new(count), condvar: Condvar::new() }
    }

    /// Decrement the count, waking waiters when it reaches zero.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.condvar.notify_all();
            }
        }
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.condvar.wait(&mut count);
        }
    }
}
