//! Modified-base calling node.
//!
//! Enriches basecalled reads with quantised modification probabilities.
//! Reads lacking the prerequisites (no basecall, no moves) are forwarded
//! unchanged with a counter increment; inference failures are logged and
//! the read is skipped.

use super::node::{MessageSink, NodeCore};
use crate::basecall::ModBaseRunner;
use crate::errors::Result;
use crate::messages::Message;
use crate::stats::NamedStats;
use log::warn;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

struct ModBaseState {
    core: NodeCore,
    runners: Vec<Arc<ModBaseRunner>>,
    next_runner: AtomicUsize,
    reads_called: AtomicU64,
    reads_not_called: AtomicU64,
    reads_failed: AtomicU64,
}

/// Node that attaches modified-base probabilities to basecalled reads.
pub struct ModBaseCallerNode {
    state: Arc<ModBaseState>,
    num_threads: usize,
}

impl ModBaseCallerNode {
    /// Create the node and start its workers.
    ///
    /// # Panics
    ///
    /// Panics if `runners` is empty.
    #[must_use]
    pub fn new(
        sink: Arc<super::NodeHandle>,
        runners: Vec<Arc<ModBaseRunner>>,
        num_threads: usize,
        max_reads: usize,
    ) -> Self {
        assert!(!runners.is_empty(), "modbase node requires at least one runner");
        let state = Arc::new(ModBaseState {
            core: NodeCore::new("modbase", max_reads, Some(sink)),
            runners,
            next_runner: AtomicUsize::new(0),
            reads_called: AtomicU64::new(0),
            reads_not_called: AtomicU64::new(0),
            reads_failed: AtomicU64::new(0),
        });
        let node = Self { state, num_threads };
        node.start_input_processing();
        node
    }

    fn start_input_processing(&self) {
        for index in 0..self.num_threads {
            let state = Arc::clone(&self.state);
            let handle = thread::Builder::new()
                .name(format!("modbase-{index}"))
                .spawn(move || Self::input_thread(&state))
                .expect("failed to spawn modbase worker");
            self.state.core.add_worker(handle);
        }
    }

    fn input_thread(state: &ModBaseState) {
        while let Some(message) = state.core.get_input_message() {
            let mut read = match message {
                Message::Read(read) => read,
                other => {
                    let _ = state.core.send_message_to_sink(other);
                    continue;
                }
            };

            if !read.is_basecalled() {
                state.reads_not_called.fetch_add(1, Ordering::Relaxed);
                let _ = state.core.send_message_to_sink(Message::Read(read));
                continue;
            }

            // Round-robin the shared runner pool.
            let runner_idx =
                state.next_runner.fetch_add(1, Ordering::Relaxed) % state.runners.len();
            let runner = &state.runners[runner_idx];

            match runner.call_mods(&read.raw_signal, &read.seq, &read.moves) {
                Ok(probs) => {
                    // floor(p * 256) capped at 255, one byte per position.
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    {
                        read.base_mod_probs = probs
                            .iter()
                            .map(|&p| ((p * 256.0).floor().clamp(0.0, 255.0)) as u8)
                            .collect();
                    }
                    read.base_mod_info = Some(runner.base_mod_info());
                    state.reads_called.fetch_add(1, Ordering::Relaxed);
                    let _ = state.core.send_message_to_sink(Message::Read(read));
                }
                Err(error) => {
                    warn!("{error}; skipping read");
                    state.reads_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

impl MessageSink for ModBaseCallerNode {
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
        stats.insert(
            "reads_called".to_string(),
            self.state.reads_called.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "reads_not_called".to_string(),
            self.state.reads_not_called.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "reads_failed".to_string(),
            self.state.reads_failed.load(Ordering::Relaxed) as f64,
        );
        stats
    }

    fn node_name(&self) -> &'static str {
        "modbase"
    }
}
