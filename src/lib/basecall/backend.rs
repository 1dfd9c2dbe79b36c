//! Model inference contracts and the built-in CPU backend.
//!
//! Neural-network inference engines are external collaborators; the
//! pipeline consumes them through [`ModelBackend`] (basecalling) and
//! [`ModBaseBackend`] (modified bases). This module ships deterministic CPU
//! implementations used by the CPU runner path and the test suite. GPU
//! engines are supplied by the embedding application via a
//! [`BackendFactory`].

use super::device::Device;
use crate::errors::{PorecallError, Result};
use crate::read::BaseModInfo;
use std::sync::Arc;

/// Static description of a basecalling model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model name, for logging.
    pub name: String,
    /// Samples per model output step.
    pub stride: usize,
    /// Approximate resident size of the model, for runner auto-sizing.
    pub model_size_bytes: u64,
}

impl ModelConfig {
    /// A small default configuration used by tests and the CPU path.
    #[must_use]
    pub fn simple(name: impl Into<String>, stride: usize) -> Self {
        Self { name: name.into(), stride, model_size_bytes: 64 * 1024 * 1024 }
    }
}

/// The called output for one signal chunk.
#[derive(Debug, Clone)]
pub struct ChunkCall {
    /// Called bases for the chunk.
    pub seq: Vec<u8>,
    /// Per-base qualities (phred+33), parallel to `seq`.
    pub qstring: Vec<u8>,
    /// One entry per model step: 1 where a new base starts.
    pub moves: Vec<u8>,
}

/// A loaded basecalling model.
///
/// `call_batch` must be deterministic for a fixed model and input; the
/// basecaller node relies on this for reproducible stitching.
pub trait ModelBackend: Send + Sync {
    /// Samples per model output step.
    fn stride(&self) -> usize;

    /// Largest batch size the backend can serve without exhausting memory.
    fn suggested_batch_size(&self) -> usize;

    /// Call a batch of equally sized signal chunks.
    ///
    /// # Errors
    ///
    /// Returns `InferenceFailed` when the batch cannot be processed; the
    /// affected reads are skipped, not retried.
    fn call_batch(&self, chunks: &[Vec<f32>]) -> Result<Vec<ChunkCall>>;
}

/// A loaded modified-base model.
pub trait ModBaseBackend: Send + Sync {
    /// Descriptor of the modifications this model reports.
    fn base_mod_info(&self) -> BaseModInfo;

    /// Modification probability per called base, in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns `InferenceFailed` when the call cannot be processed.
    fn call_mods(&self, signal: &[f32], seq: &[u8], moves: &[u8]) -> Result<Vec<f32>>;
}

/// Creates device-bound model backends.
pub trait BackendFactory: Send + Sync {
    /// Load the model onto the given device.
    ///
    /// # Errors
    ///
    /// Returns `ModelLoadFailed` when the device has no engine in this
    /// build or the model cannot be loaded.
    fn create(&self, config: &ModelConfig, device: &Device) -> Result<Arc<dyn ModelBackend>>;
}

/// Factory providing only the built-in CPU engine.
///
/// GPU devices fail with `ModelLoadFailed`; a build with GPU engines
/// substitutes its own factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackendFactory;

impl BackendFactory for CpuBackendFactory {
    fn create(&self, config: &ModelConfig, device: &Device) -> Result<Arc<dyn ModelBackend>> {
        match device {
            Device::Cpu => Ok(Arc::new(CpuModel::new(config)?)),
            Device::Metal | Device::Cuda(_) => Err(PorecallError::ModelLoadFailed {
                model: config.name.clone(),
                reason: format!("no inference engine for device '{device}' in this build"),
            }),
        }
    }
}

/// Signal levels quantised into the four-base alphabet.
const LEVEL_THRESHOLDS: [f32; 3] = [-0.5, 0.0, 0.5];
const LEVEL_BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Deterministic CPU basecalling backend.
///
/// Decodes by quantising the per-step mean of the normalised signal into
/// four levels and emitting a base whenever the level changes between
/// steps. This is a level-transition decoder, not a neural network; it
/// exists so the CPU pipeline path and the tests have a real, reproducible
/// engine behind the [`ModelBackend`] contract.
pub struct CpuModel {
    stride: usize,
}

impl CpuModel {
    /// Load the CPU model for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ModelLoadFailed` when the configuration is unusable.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        if config.stride == 0 {
            return Err(PorecallError::ModelLoadFailed {
                model: config.name.clone(),
                reason: "model stride must be non-zero".to_string(),
            });
        }
        Ok(Self { stride: config.stride })
    }

    fn level_of(mean: f32) -> usize {
        LEVEL_THRESHOLDS.iter().filter(|&&t| mean > t).count()
    }

    fn call_chunk(&self, signal: &[f32]) -> ChunkCall {
        let num_steps = signal.len() / self.stride;
        let mut seq = Vec::new();
        let mut qstring = Vec::new();
        let mut moves = Vec::with_capacity(num_steps);
        let mut prev_level: Option<usize> = None;

        for step in 0..num_steps {
            let window = &signal[step * self.stride..(step + 1) * self.stride];
            #[allow(clippy::cast_precision_loss)]
            let mean = window.iter().sum::<f32>() / window.len() as f32;
            let level = Self::level_of(mean);

            if prev_level == Some(level) {
                moves.push(0);
            } else {
                moves.push(1);
                seq.push(LEVEL_BASES[level]);
                // Confidence scales with the distance from the nearest
                // quantisation threshold.
                let distance = LEVEL_THRESHOLDS
                    .iter()
                    .map(|t| (mean - t).abs())
                    .fold(f32::INFINITY, f32::min);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let qscore = (10.0 + distance * 40.0).min(50.0) as u8;
                qstring.push(b'!' + qscore);
            }
            prev_level = Some(level);
        }

        ChunkCall { seq, qstring, moves }
    }
}

impl ModelBackend for CpuModel {
    fn stride(&self) -> usize {
        self.stride
    }

    fn suggested_batch_size(&self) -> usize {
        128
    }

    fn call_batch(&self, chunks: &[Vec<f32>]) -> Result<Vec<ChunkCall>> {
        Ok(chunks.iter().map(|chunk| self.call_chunk(chunk)).collect())
    }
}

/// Deterministic CPU modified-base backend: reports 5mC on every C.
///
/// Stands in for the external modified-base engines behind the
/// [`ModBaseBackend`] contract.
pub struct CpuModBaseModel {
    info: BaseModInfo,
}

impl CpuModBaseModel {
    /// Create the backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: BaseModInfo {
                alphabet: "ACGT".to_string(),
                long_names: "5mC".to_string(),
                context: "CG".to_string(),
            },
        }
    }
}

impl Default for CpuModBaseModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ModBaseBackend for CpuModBaseModel {
    fn base_mod_info(&self) -> BaseModInfo {
        self.info.clone()
    }

    fn call_mods(&self, _signal: &[f32], seq: &[u8], _moves: &[u8]) -> Result<Vec<f32>> {
        // A C followed by G scores high, a lone C scores low, everything
        // else is unmodified.
        Ok(seq
            .iter()
            .enumerate()
            .map(|(i, &base)| {
                if base == b'C' {
                    if seq.get(i + 1) == Some(&b'G') { 0.9 } else { 0.1 }
                } else {
                    0.0
                }
            })
            .collect())
    }
}
