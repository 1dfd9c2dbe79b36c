//! Runner handles over callers.
//!
//! A [`Runner`] is the stateless handle a basecaller worker thread holds:
//! it exposes the model geometry and `call_chunks`. GPU-style runners share
//! a device [`Caller`] through its internal task queue; CPU runners own a
//! lightweight inference context of their own and need no caller.

use super::backend::{ChunkCall, ModBaseBackend, ModelBackend};
use super::caller::Caller;
use crate::concurrency::{TaskPriority, TaskSender};
use crate::errors::Result;
use crate::read::BaseModInfo;
use std::sync::Arc;

enum RunnerKind {
    /// Owns its inference context outright.
    Cpu { backend: Arc<dyn ModelBackend>, chunk_size: usize, batch_size: usize },
    /// Shares a device caller through a per-runner producer queue.
    Shared { caller: Arc<Caller>, sender: TaskSender },
}

/// Handle for submitting chunk batches to a model.
///
/// Each runner is used by at most one basecaller worker thread at a time;
/// the node enforces this by assigning one worker per runner.
pub struct Runner {
    kind: RunnerKind,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner").finish_non_exhaustive()
    }
}

impl Runner {
    /// Create a CPU runner owning its own inference context.
    ///
    /// The chunk size is rounded up to the nearest stride multiple.
    #[must_use]
    pub fn cpu(backend: Arc<dyn ModelBackend>, chunk_size: usize, batch_size: usize) -> Arc<Self> {
        let stride = backend.stride();
        let chunk_size = chunk_size.div_ceil(stride) * stride;
        Arc::new(Self { kind: RunnerKind::Cpu { backend, chunk_size, batch_size } })
    }

    /// Create a runner sharing a device caller.
    #[must_use]
    pub fn shared(caller: &Arc<Caller>, priority: TaskPriority) -> Arc<Self> {
        let sender = caller.create_task_queue(priority);
        Arc::new(Self { kind: RunnerKind::Shared { caller: Arc::clone(caller), sender } })
    }

    /// Samples per model output step.
    #[must_use]
    pub fn stride(&self) -> usize {
        match &self.kind {
            RunnerKind::Cpu { backend, .. } => backend.stride(),
            RunnerKind::Shared { caller, .. } => caller.stride(),
        }
    }

    /// Chunk size this runner expects, a multiple of the stride.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        match &self.kind {
            RunnerKind::Cpu { chunk_size, .. } => *chunk_size,
            RunnerKind::Shared { caller, .. } => caller.chunk_size(),
        }
    }

    /// Largest batch this runner accepts.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        match &self.kind {
            RunnerKind::Cpu { batch_size, .. } => *batch_size,
            RunnerKind::Shared { caller, .. } => caller.batch_size(),
        }
    }

    /// Call a batch of signal chunks.
    ///
    /// # Errors
    ///
    /// Propagates `InferenceFailed` from the backend.
    pub fn call_chunks(&self, chunks: Vec<Vec<f32>>) -> Result<Vec<ChunkCall>> {
        match &self.kind {
            RunnerKind::Cpu { backend, .. } => backend.call_batch(&chunks),
            RunnerKind::Shared { caller, sender } => caller.call_batch(sender, chunks),
        }
    }
}

/// Runner handle for modified-base models.
pub struct ModBaseRunner {
    backend: Arc<dyn ModBaseBackend>,
    batch_size: usize,
}

impl ModBaseRunner {
    /// Create a runner over a modified-base backend.
    #[must_use]
    pub fn new(backend: Arc<dyn ModBaseBackend>, batch_size: usize) -> Arc<Self> {
        Arc::new(Self { backend, batch_size })
    }

    /// Descriptor of the modifications the model reports.
    #[must_use]
    pub fn base_mod_info(&self) -> BaseModInfo {
        self.backend.base_mod_info()
    }

    /// Batch size for modbase calls.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Modification probability per called base, in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Propagates `InferenceFailed` from the backend.
    pub fn call_mods(&self, signal: &[f32], seq: &[u8], moves: &[u8]) -> Result<Vec<f32>> {
        self.backend.call_mods(signal, seq, moves)
    }
}
