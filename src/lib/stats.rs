//! Named statistics snapshots for pipeline observability.
//!
//! Every pipeline node exposes `sample_stats()` returning a flat map of
//! `name -> f64`. Sampling uses atomic counters and queue size hints only,
//! so it is safe to call concurrently with processing.

use crate::concurrency::WorkQueue;
use std::collections::BTreeMap;

/// A flat, ordered snapshot of named statistics.
pub type NamedStats = BTreeMap<String, f64>;

/// Snapshot the standard statistics of a node's input queue.
///
/// Includes `input_queue_size`, `input_queue_capacity`, and
/// `input_queue_high_water`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn from_work_queue<T>(queue: &WorkQueue<T>) -> NamedStats {
    let mut stats = NamedStats::new();
    stats.insert("input_queue_size".to_string(), queue.len() as f64);
    stats.insert("input_queue_capacity".to_string(), queue.capacity() as f64);
    stats.insert("input_queue_high_water".to_string(), queue.high_water() as f64);
    stats
}

/// Merge `other` into `stats`, prefixing each key with `prefix.`.
pub fn merge_prefixed(stats: &mut NamedStats, prefix: &str, other: NamedStats) {
    for (key, value) in other {
        stats.insert(format!("{prefix}.{key}"), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_work_queue() {
        let queue: WorkQueue<u32> = WorkQueue::new(16);
        queue.try_push(1).unwrap();
        queue.try_push(2).unwrap();

        let stats = from_work_queue(&queue);
        assert!((stats["input_queue_size"] - 2.0).abs() < f64::EPSILON);
        assert!((stats["input_queue_capacity"] - 16.0).abs() < f64::EPSILON);
        assert!((stats["input_queue_high_water"] - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_merge_prefixed() {
        let mut stats = NamedStats::new();
        let mut node_stats = NamedStats::new();
        node_stats.insert("reads_estimated".to_string(), 5.0);

        merge_prefixed(&mut stats, "polya", node_stats);
        assert!((stats["polya.reads_estimated"] - 5.0).abs() < f64::EPSILON);
    }
}
