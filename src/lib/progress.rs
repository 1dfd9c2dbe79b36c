//! Interval-based progress logging.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counter that logs a message each time it crosses an
/// interval boundary.
pub struct ProgressTracker {
    interval: u64,
    message: String,
    count: AtomicU64,
}

impl ProgressTracker {
    /// Create a tracker with a default interval of 10,000.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { interval: 10_000, message: message.into(), count: AtomicU64::new(0) }
    }

    /// Set the logging interval.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    /// Add to the count, logging once per interval boundary crossed.
    ///
    /// Returns `true` when the new count sits exactly on a boundary, which
    /// `log_final` uses to avoid a duplicate closing line.
    pub fn log_if_needed(&self, additional: u64) -> bool {
        if additional == 0 {
            let count = self.count.load(Ordering::Relaxed);
            return count > 0 && count.is_multiple_of(self.interval);
        }

        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let new_count = prev + additional;
        for boundary in (prev / self.interval + 1)..=(new_count / self.interval) {
            info!("{} {}", self.message, boundary * self.interval);
        }
        new_count.is_multiple_of(self.interval)
    }

    /// Log the final count unless the last interval line already covered it.
    pub fn log_final(&self) {
        if !self.log_if_needed(0) {
            let count = self.count.load(Ordering::Relaxed);
            if count > 0 {
                info!("{} {} (complete)", self.message, count);
            }
        }
    }

    /// The current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_detection() {
        let tracker = ProgressTracker::new("Reads").with_interval(10);
        assert!(!tracker.log_if_needed(5));
        assert!(tracker.log_if_needed(5));
        assert!(!tracker.log_if_needed(3));
        assert!(!tracker.log_if_needed(10));
        assert_eq!(tracker.count(), 23);
    }

    #[test]
    fn test_log_final_off_boundary() {
        let tracker = ProgressTracker::new("Reads").with_interval(100);
        tracker.log_if_needed(250);
        tracker.log_final();
    }

    #[test]
    fn test_concurrent_counting() {
        use std::sync::Arc;
        let tracker = Arc::new(ProgressTracker::new("Reads").with_interval(1000));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = Arc::clone(&tracker);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    tracker.log_if_needed(1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.count(), 800);
    }
}
