//! The basecaller node: chunking, batched inference, and stitching.
//!
//! Reads are decomposed into overlapping chunks which are batched across
//! concurrent reads and submitted to a pool of runners; one worker thread
//! per runner keeps each runner single-threaded. When the last chunk of a
//! read completes, the finishing worker stitches the chunk calls and
//! forwards the read. The node's input queue bounds in-flight reads; the
//! runner pool bounds concurrent batches.

use super::node::{MessageSink, NodeCore};
use super::stitch::stitch_chunks;
use crate::basecall::Runner;
use crate::concurrency::WorkQueue;
use crate::errors::Result;
use crate::messages::Message;
use crate::read::{CallChunk, SimplexRead};
use crate::stats::NamedStats;
use log::warn;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// A read waiting for its chunks to come back from the runners.
struct PendingRead {
    read: Mutex<Option<Box<SimplexRead>>>,
    chunks: Mutex<Vec<Option<CallChunk>>>,
    chunks_remaining: AtomicUsize,
    failed: AtomicBool,
}

/// One chunk of signal queued for inference.
struct ChunkTask {
    pending: Arc<PendingRead>,
    chunk_idx: usize,
    input_offset: usize,
    raw_chunk_size: usize,
    signal: Vec<f32>,
}

struct BasecallerState {
    core: NodeCore,
    chunk_queue: WorkQueue<ChunkTask>,
    runner_workers: Mutex<Vec<JoinHandle<()>>>,
    chunk_size: usize,
    overlap: usize,
    stride: usize,
    reads_basecalled: AtomicU64,
    reads_failed: AtomicU64,
    chunks_called: AtomicU64,
}

/// Node that basecalls reads through a shared runner pool.
pub struct BasecallerNode {
    state: Arc<BasecallerState>,
    runners: Vec<Arc<Runner>>,
    num_input_threads: usize,
}

impl BasecallerNode {
    /// Create the node and start its workers.
    ///
    /// All runners must agree on stride and chunk size (the runner plan
    /// guarantees this). The overlap is rounded down to a stride multiple
    /// so chunk boundaries stay aligned.
    ///
    /// # Panics
    ///
    /// Panics if `runners` is empty.
    #[must_use]
    pub fn new(
        sink: Arc<super::NodeHandle>,
        runners: Vec<Arc<Runner>>,
        overlap: usize,
        max_reads: usize,
    ) -> Self {
        assert!(!runners.is_empty(), "basecaller requires at least one runner");
        let stride = runners[0].stride();
        let chunk_size = runners[0].chunk_size();
        let overlap = (overlap / stride) * stride;
        assert!(overlap < chunk_size, "overlap must be smaller than the chunk size");

        let batch_size = runners[0].batch_size();
        let chunk_queue_capacity = (2 * batch_size * runners.len()).max(64);

        let state = Arc::new(BasecallerState {
            core: NodeCore::new("basecaller", max_reads, Some(sink)),
            chunk_queue: WorkQueue::new(chunk_queue_capacity),
            runner_workers: Mutex::new(Vec::new()),
            chunk_size,
            overlap,
            stride,
            reads_basecalled: AtomicU64::new(0),
            reads_failed: AtomicU64::new(0),
            chunks_called: AtomicU64::new(0),
        });
        let node = Self { state, runners, num_input_threads: 1 };
        node.start_input_processing();
        node
    }

    fn start_input_processing(&self) {
        for index in 0..self.num_input_threads {
            let state = Arc::clone(&self.state);
            let handle = thread::Builder::new()
                .name(format!("basecaller-split-{index}"))
                .spawn(move || Self::input_thread(&state))
                .expect("failed to spawn basecaller splitter");
            self.state.core.add_worker(handle);
        }
        for (index, runner) in self.runners.iter().enumerate() {
            let state = Arc::clone(&self.state);
            let runner = Arc::clone(runner);
            let handle = thread::Builder::new()
                .name(format!("basecaller-runner-{index}"))
                .spawn(move || Self::runner_thread(&state, &runner))
                .expect("failed to spawn basecaller runner worker");
            self.state.runner_workers.lock().push(handle);
        }
    }

    /// Splitter: pops reads, decomposes them into chunk tasks.
    fn input_thread(state: &BasecallerState) {
        while let Some(message) = state.core.get_input_message() {
            let read = match message {
                Message::Read(read) => read,
                other => {
                    let _ = state.core.send_message_to_sink(other);
                    continue;
                }
            };
            Self::split_read(state, read);
        }
    }

    fn split_read(state: &BasecallerState, read: Box<SimplexRead>) {
        // Only whole model steps are callable; trailing samples short of a
        // stride are ignored.
        let usable_len = (read.raw_signal.len() / state.stride) * state.stride;
        if usable_len == 0 {
            warn!("Read {} has no callable signal; dropping", read.read_id);
            state.reads_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let step = state.chunk_size - state.overlap;
        let num_chunks = if usable_len <= state.chunk_size {
            1
        } else {
            (usable_len - state.overlap).div_ceil(step)
        };

        let pending = Arc::new(PendingRead {
            read: Mutex::new(None),
            chunks: Mutex::new((0..num_chunks).map(|_| None).collect()),
            chunks_remaining: AtomicUsize::new(num_chunks),
            failed: AtomicBool::new(false),
        });

        let mut tasks = Vec::with_capacity(num_chunks);
        for idx in 0..num_chunks {
            let offset = (idx * step).min(usable_len.saturating_sub(state.chunk_size));
            let raw_chunk_size = state.chunk_size.min(usable_len - offset);
            let mut signal = read.raw_signal[offset..offset + raw_chunk_size].to_vec();
            // Pad to the full chunk size so batches stay rectangular.
            signal.resize(state.chunk_size, 0.0);
            tasks.push(ChunkTask {
                pending: Arc::clone(&pending),
                chunk_idx: idx,
                input_offset: offset,
                raw_chunk_size,
                signal,
            });
        }
        *pending.read.lock() = Some(read);

        for task in tasks {
            if state.chunk_queue.try_push(task).is_err() {
                // Shutting down mid-read: mark the read failed so the
                // remaining chunks cannot forward a partial call.
                pending.failed.store(true, Ordering::Release);
                state.reads_failed.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    /// One worker per runner: form batches, call, attach results.
    fn runner_thread(state: &BasecallerState, runner: &Runner) {
        let batch_size = runner.batch_size();
        while let Some(first) = state.chunk_queue.pop() {
            let mut batch = vec![first];
            while batch.len() < batch_size {
                match state.chunk_queue.try_pop() {
                    Some(task) => batch.push(task),
                    None => break,
                }
            }

            let signals: Vec<Vec<f32>> =
                batch.iter_mut().map(|task| std::mem::take(&mut task.signal)).collect();

            match runner.call_chunks(signals) {
                Ok(calls) => {
                    for (task, call) in batch.into_iter().zip(calls) {
                        Self::attach_call(state, &task, call);
                        state.chunks_called.fetch_add(1, Ordering::Relaxed);
                        Self::complete_chunk(state, &task.pending);
                    }
                }
                Err(error) => {
                    for task in batch {
                        if !task.pending.failed.swap(true, Ordering::AcqRel) {
                            let read_id = task
                                .pending
                                .read
                                .lock()
                                .as_ref()
                                .map_or_else(String::new, |r| r.read_id.clone());
                            warn!("Inference failed for read {read_id}: {error}; skipping");
                            state.reads_failed.fetch_add(1, Ordering::Relaxed);
                        }
                        Self::complete_chunk(state, &task.pending);
                    }
                }
            }
        }
    }

    fn attach_call(state: &BasecallerState, task: &ChunkTask, call: crate::basecall::ChunkCall) {
        // Drop the padded tail: keep only the steps the chunk actually
        // covers, and the bases they emit.
        let kept_steps = task.raw_chunk_size / state.stride;
        let mut moves = call.moves;
        moves.truncate(kept_steps);
        let kept_bases: usize = moves.iter().map(|&m| usize::from(m)).sum();
        let mut seq = call.seq;
        let mut qstring = call.qstring;
        seq.truncate(kept_bases);
        qstring.truncate(kept_bases);

        let chunk = CallChunk {
            idx: task.chunk_idx,
            input_offset: task.input_offset,
            raw_chunk_size: task.raw_chunk_size,
            seq,
            qstring,
            moves,
        };
        task.pending.chunks.lock()[task.chunk_idx] = Some(chunk);
    }

    fn complete_chunk(state: &BasecallerState, pending: &Arc<PendingRead>) {
        if pending.chunks_remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        // Last chunk of the read: stitch and forward.
        let Some(mut read) = pending.read.lock().take() else {
            return;
        };
        if pending.failed.load(Ordering::Acquire) {
            return;
        }

        let chunks: Vec<CallChunk> = pending
            .chunks
            .lock()
            .iter_mut()
            .map(|slot| slot.take().expect("all chunks called before completion"))
            .collect();

        match stitch_chunks(&read.read_id, &chunks, state.stride) {
            Ok(stitched) => {
                read.seq = stitched.seq;
                read.qstring = stitched.qstring;
                read.moves = stitched.moves;
                read.model_stride = state.stride;
                state.reads_basecalled.fetch_add(1, Ordering::Relaxed);
                let _ = state.core.send_message_to_sink(Message::Read(read));
            }
            Err(error) => {
                warn!("{error}; skipping read");
                state.reads_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl MessageSink for BasecallerNode {
    fn push_message(&self, message: Message) -> Result<()> {
        self.state.core.push_message(message)
    }

    fn terminate(&self) {
        // Drain the read queue first so every chunk is enqueued, then the
        // chunk queue, then hand termination down.
        self.state.core.stop_input_processing();
        self.state.chunk_queue.terminate();
        let handles: Vec<_> = self.state.runner_workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.state.core.terminate_sink();
    }

    fn restart(&self) {
        self.state.core.restart_input_queue();
        self.state.chunk_queue.restart();
        self.start_input_processing();
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample_stats(&self) -> NamedStats {
        let mut stats = self.state.core.queue_stats();
        stats.insert(
            "chunk_queue_size".to_string(),
            self.state.chunk_queue.len() as f64,
        );
        stats.insert(
            "reads_basecalled".to_string(),
            self.state.reads_basecalled.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "reads_failed".to_string(),
            self.state.reads_failed.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "chunks_called".to_string(),
            self.state.chunks_called.load(Ordering::Relaxed) as f64,
        );
        stats
    }

    fn node_name(&self) -> &'static str {
        "basecaller"
    }
}
