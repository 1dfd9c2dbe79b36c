//! Device-resident callers.
//!
//! A [`Caller`] owns the loaded model and the scratch state for one device.
//! It is not thread safe except through its own internal queueing: batch
//! calls from all runners bound to the caller are serialised through a
//! single-worker task executor, and the executor's rendezvous `send`
//! bounds in-flight device work. The caller strictly outlives every runner
//! bound to it (runners hold an `Arc`).

use super::backend::{ChunkCall, ModelBackend};
use super::device::Device;
use crate::concurrency::{AsyncTaskExecutor, Flag, TaskPriority, TaskSender};
use crate::errors::Result;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

/// A device-bound caller: model weights plus serialised device access.
pub struct Caller {
    backend: Arc<dyn ModelBackend>,
    device: Device,
    chunk_size: usize,
    batch_size: usize,
    executor: AsyncTaskExecutor,
}

impl Caller {
    /// Bind a backend to a device, negotiating batch and chunk sizes.
    ///
    /// A requested batch size of 0 selects the backend's suggestion; a
    /// larger request is negotiated downward to what the backend can
    /// serve. The chunk size is rounded up to the nearest multiple of the
    /// model stride.
    #[must_use]
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        device: Device,
        requested_chunk_size: usize,
        requested_batch_size: usize,
    ) -> Arc<Self> {
        let suggested = backend.suggested_batch_size();
        let batch_size = if requested_batch_size == 0 {
            suggested
        } else {
            requested_batch_size.min(suggested)
        };
        if requested_batch_size != 0 && batch_size != requested_batch_size {
            debug!(
                "- negotiated batch size down to fit device {device}: {requested_batch_size} -> {batch_size}"
            );
        }

        let stride = backend.stride();
        let chunk_size = requested_chunk_size.div_ceil(stride) * stride;

        Arc::new(Self {
            backend,
            executor: AsyncTaskExecutor::new(1, format!("caller-{device}")),
            device,
            chunk_size,
            batch_size,
        })
    }

    /// The device this caller is bound to.
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Samples per model output step.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.backend.stride()
    }

    /// Negotiated chunk size, a multiple of the model stride.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Negotiated batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Create a producer queue into this caller's executor for one runner.
    #[must_use]
    pub fn create_task_queue(&self, priority: TaskPriority) -> TaskSender {
        self.executor.create_task_queue(priority)
    }

    /// Run one batch on the device through the given producer queue,
    /// blocking until the result is available.
    ///
    /// # Errors
    ///
    /// Propagates `InferenceFailed` from the backend.
    pub fn call_batch(&self, sender: &TaskSender, chunks: Vec<Vec<f32>>) -> Result<Vec<ChunkCall>> {
        let backend = Arc::clone(&self.backend);
        let slot: Arc<Mutex<Option<Result<Vec<ChunkCall>>>>> = Arc::new(Mutex::new(None));
        let done = Arc::new(Flag::new());
        {
            let slot = Arc::clone(&slot);
            let done = Arc::clone(&done);
            sender.send(move || {
                *slot.lock() = Some(backend.call_batch(&chunks));
                done.signal();
            });
        }
        done.wait();
        let result = slot.lock().take().expect("caller task stored its result before signalling");
        result
    }
}
