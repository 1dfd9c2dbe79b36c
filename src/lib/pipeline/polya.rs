//! PolyA tail length estimation node.
//!
//! The calculator is injected per read through the client-info context
//! container; the node looks it up by type and no-ops gracefully when none
//! is registered. Tail lengths inside `(0, max_tail_length)` are recorded
//! on the read, everything else counts as not called.

use super::node::{MessageSink, NodeCore};
use crate::errors::Result;
use crate::messages::Message;
use crate::poly_tail::PolyTailCalculator;
use crate::stats::NamedStats;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

struct PolyAState {
    core: NodeCore,
    num_called: AtomicU64,
    num_not_called: AtomicU64,
    total_tail_lengths: AtomicU64,
    // Debug histogram only; guarded so stats sampling stays lock-free.
    tail_length_counts: Mutex<BTreeMap<i64, u64>>,
}

/// Node that estimates polyA tail lengths on basecalled reads.
pub struct PolyACalculatorNode {
    state: Arc<PolyAState>,
    num_threads: usize,
}

impl PolyACalculatorNode {
    /// Create the node and start its workers.
    #[must_use]
    pub fn new(sink: Arc<super::NodeHandle>, num_threads: usize, max_reads: usize) -> Self {
        let state = Arc::new(PolyAState {
            core: NodeCore::new("polya", max_reads, Some(sink)),
            num_called: AtomicU64::new(0),
            num_not_called: AtomicU64::new(0),
            total_tail_lengths: AtomicU64::new(0),
            tail_length_counts: Mutex::new(BTreeMap::new()),
        });
        let node = Self { state, num_threads };
        node.start_input_processing();
        node
    }

    fn start_input_processing(&self) {
        for index in 0..self.num_threads {
            let state = Arc::clone(&self.state);
            let handle = thread::Builder::new()
                .name(format!("polya-{index}"))
                .spawn(move || Self::input_thread(&state))
                .expect("failed to spawn polya worker");
            self.state.core.add_worker(handle);
        }
    }

    fn input_thread(state: &PolyAState) {
        while let Some(message) = state.core.get_input_message() {
            let mut read = match message {
                Message::Read(read) => read,
                other => {
                    let _ = state.core.send_message_to_sink(other);
                    continue;
                }
            };

            let calculator = read.client_info.contexts().get::<dyn PolyTailCalculator>();
            let Some(calculator) = calculator else {
                state.num_not_called.fetch_add(1, Ordering::Relaxed);
                let _ = state.core.send_message_to_sink(Message::Read(read));
                continue;
            };

            let anchor = calculator.determine_signal_anchor_and_strand(&read);
            if anchor.signal_anchor.is_some() {
                let num_bases = calculator.calculate_num_bases(&read, &anchor);
                if num_bases > 0 && num_bases < calculator.max_tail_length() {
                    state.num_called.fetch_add(1, Ordering::Relaxed);
                    #[allow(clippy::cast_sign_loss)]
                    state.total_tail_lengths.fetch_add(num_bases as u64, Ordering::Relaxed);
                    if log::log_enabled!(log::Level::Debug) {
                        *state.tail_length_counts.lock().entry(num_bases).or_insert(0) += 1;
                    }
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    {
                        read.rna_poly_tail_length = Some(num_bases as u32);
                    }
                } else {
                    state.num_not_called.fetch_add(1, Ordering::Relaxed);
                }
            } else {
                state.num_not_called.fetch_add(1, Ordering::Relaxed);
            }

            let _ = state.core.send_message_to_sink(Message::Read(read));
        }
    }
}

impl MessageSink for PolyACalculatorNode {
    fn push_message(&self, message: Message) -> Result<()> {
        self.state.core.push_message(message)
    }

    fn terminate(&self) {
        self.state.core.stop_input_processing();
        self.state.core.terminate_sink();
    }

    fn restart(&self) {
        self.state.core.restart_input_queue();
        self.start_input_processing();
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample_stats(&self) -> NamedStats {
        let mut stats = self.state.core.queue_stats();
        let num_called = self.state.num_called.load(Ordering::Relaxed);
        stats.insert("reads_estimated".to_string(), num_called as f64);
        stats.insert(
            "reads_not_estimated".to_string(),
            self.state.num_not_called.load(Ordering::Relaxed) as f64,
        );
        let average = if num_called > 0 {
            self.state.total_tail_lengths.load(Ordering::Relaxed) as f64 / num_called as f64
        } else {
            0.0
        };
        stats.insert("average_tail_length".to_string(), average);

        if log::log_enabled!(log::Level::Debug) {
            for (length, count) in self.state.tail_length_counts.lock().iter() {
                stats.insert(format!("pt.{length}"), *count as f64);
            }
        }

        stats
    }

    fn node_name(&self) -> &'static str {
        "polya"
    }
}
