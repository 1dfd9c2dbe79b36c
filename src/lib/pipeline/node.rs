//! Shared node infrastructure: input queue, worker threads, and the
//! message-sink capability set.
//!
//! A node owns a bounded input queue and a pool of worker threads that
//! drain it. Teardown is explicit and topological: `terminate` closes the
//! node's queue, joins its workers once the queue is drained, and only then
//! terminates the downstream sink, so children outlive parents during
//! shutdown.

use crate::concurrency::WorkQueue;
use crate::errors::{PorecallError, Result};
use crate::messages::Message;
use crate::stats::{self, NamedStats};
use enum_dispatch::enum_dispatch;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::NodeHandle;

/// The capability set every pipeline node exposes.
///
/// `push_message` is only valid while the node is running; after
/// `terminate` it reports [`PorecallError::QueueClosed`] until `restart`
/// re-arms the node.
#[enum_dispatch]
pub trait MessageSink {
    /// Producer-side entry point; enqueues onto the node's input queue.
    ///
    /// # Errors
    ///
    /// Returns [`PorecallError::QueueClosed`] if the node has been
    /// terminated.
    fn push_message(&self, message: Message) -> Result<()>;

    /// Drain remaining work, join workers, then terminate the downstream
    /// sink.
    fn terminate(&self);

    /// Re-arm the input queue and respawn workers. Requires `terminate` to
    /// have completed. The downstream sink is restarted first so workers
    /// never push into a closed queue.
    fn restart(&self);

    /// Snapshot node statistics. Safe to call concurrently with processing.
    fn sample_stats(&self) -> NamedStats;

    /// Stable node name used to prefix stats.
    fn node_name(&self) -> &'static str;
}

/// Queue, worker handles, and downstream link shared by all node types.
pub struct NodeCore {
    name: &'static str,
    work_queue: WorkQueue<Message>,
    sink: Option<Arc<NodeHandle>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeCore {
    /// Create a core with the given queue capacity and downstream sink
    /// (`None` for terminal nodes).
    #[must_use]
    pub fn new(name: &'static str, max_messages: usize, sink: Option<Arc<NodeHandle>>) -> Self {
        Self {
            name,
            work_queue: WorkQueue::new(max_messages),
            sink,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// The node's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Blocking read from the input queue.
    ///
    /// Returns `None` once the queue is terminated and drained; this is the
    /// only exit condition for worker loops.
    pub fn get_input_message(&self) -> Option<Message> {
        self.work_queue.pop()
    }

    /// Enqueue a message on this node's input queue.
    ///
    /// # Errors
    ///
    /// Returns [`PorecallError::QueueClosed`] when the node is terminated.
    pub fn push_message(&self, message: Message) -> Result<()> {
        self.work_queue.try_push(message).map_err(|_| PorecallError::QueueClosed)
    }

    /// Forward a message to the downstream sink.
    ///
    /// Every message variant a node does not consume must pass through
    /// here unchanged; terminal nodes have no sink and absorb the message.
    ///
    /// # Errors
    ///
    /// Propagates [`PorecallError::QueueClosed`] from the sink.
    pub fn send_message_to_sink(&self, message: Message) -> Result<()> {
        match &self.sink {
            Some(sink) => sink.push_message(message),
            None => Ok(()),
        }
    }

    /// The downstream sink, if any.
    #[must_use]
    pub fn sink(&self) -> Option<&Arc<NodeHandle>> {
        self.sink.as_ref()
    }

    /// Record a spawned worker for later joining.
    pub fn add_worker(&self, handle: JoinHandle<()>) {
        self.workers.lock().push(handle);
    }

    /// Close the input queue and join all workers.
    ///
    /// Workers observe the drain-then-closed protocol of the queue, so all
    /// queued messages are processed before this returns.
    pub fn stop_input_processing(&self) {
        self.work_queue.terminate();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Terminate the downstream sink, in topological order after this
    /// node's own drain.
    pub fn terminate_sink(&self) {
        if let Some(sink) = &self.sink {
            sink.terminate();
        }
    }

    /// Restart the downstream sink, then re-arm this node's queue.
    pub fn restart_input_queue(&self) {
        if let Some(sink) = &self.sink {
            sink.restart();
        }
        self.work_queue.restart();
    }

    /// Standard queue statistics for `sample_stats`.
    #[must_use]
    pub fn queue_stats(&self) -> NamedStats {
        stats::from_work_queue(&self.work_queue)
    }
}
