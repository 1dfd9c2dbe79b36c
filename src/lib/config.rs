//! Pipeline configuration record.
//!
//! This is the config surface the core consumes; the CLI maps its flags
//! onto it 1:1.

use crate::errors::{PorecallError, Result};
use std::path::PathBuf;

/// Smallest allowed buffer for sorted BAM output (100 KB).
pub const MINIMUM_SORTED_BUFFER_BYTES: u64 = 100_000;

/// Configuration for a basecalling pipeline run.
#[derive(Debug, Clone)]
pub struct BasecallerConfig {
    /// Device string: `"cpu"`, `"metal"`, `"cuda:all"`, or `"cuda:0,1,..."`.
    pub device: String,
    /// Chunk batch size; 0 selects an automatic size.
    pub batch_size: u32,
    /// Signal samples per chunk. Rounded up to a stride multiple by the caller.
    pub chunk_size: u32,
    /// Overlap between adjacent chunks, in samples.
    pub overlap: u32,
    /// Runners per device (GPU) or total runners (CPU, 0 = auto).
    pub num_runners: u32,
    /// Batch size for modified-base calling.
    pub modbase_batch_size: u32,
    /// Worker threads for the modified-base node.
    pub modbase_threads: u32,
    /// Modified-base model paths; empty disables the modbase node.
    pub modbase_models: Vec<PathBuf>,
    /// Emit FASTQ instead of BAM.
    pub emit_fastq: bool,
    /// Coordinate-sort the BAM output.
    pub sort_bam: bool,
    /// Record buffer size for sorted BAM output.
    pub sorted_bam_buffer_bytes: u64,
}

impl Default for BasecallerConfig {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
            batch_size: 0,
            chunk_size: 10_000,
            overlap: 500,
            num_runners: 2,
            modbase_batch_size: 1_000,
            modbase_threads: 1,
            modbase_models: Vec::new(),
            emit_fastq: false,
            sort_bam: false,
            sorted_bam_buffer_bytes: 64 * 1024 * 1024,
        }
    }
}

impl BasecallerConfig {
    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` when the chunk geometry or sorted-buffer
    /// size is unusable.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PorecallError::InvalidParameter {
                parameter: "chunk_size".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.overlap >= self.chunk_size {
            return Err(PorecallError::InvalidParameter {
                parameter: "overlap".to_string(),
                reason: format!(
                    "must be smaller than chunk_size ({} >= {})",
                    self.overlap, self.chunk_size
                ),
            });
        }
        if self.sort_bam && self.sorted_bam_buffer_bytes < MINIMUM_SORTED_BUFFER_BYTES {
            return Err(PorecallError::InvalidParameter {
                parameter: "sorted_bam_buffer_bytes".to_string(),
                reason: format!(
                    "must be at least {MINIMUM_SORTED_BUFFER_BYTES} ({} KB)",
                    MINIMUM_SORTED_BUFFER_BYTES / 1000
                ),
            });
        }
        if self.emit_fastq && !self.modbase_models.is_empty() {
            return Err(PorecallError::InvalidParameter {
                parameter: "emit_fastq".to_string(),
                reason: "modified-base models cannot be used with FASTQ output".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(BasecallerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_less_than_chunk_size() {
        let config = BasecallerConfig { overlap: 10_000, ..BasecallerConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sorted_buffer_minimum() {
        let config = BasecallerConfig {
            sort_bam: true,
            sorted_bam_buffer_bytes: 50_000,
            ..BasecallerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("sorted_bam_buffer_bytes"));
    }

    #[test]
    fn test_fastq_excludes_modbase() {
        let config = BasecallerConfig {
            emit_fastq: true,
            modbase_models: vec![PathBuf::from("model.bin")],
            ..BasecallerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
