//! The read data model: raw signal, basecalls, and per-read metadata.
//!
//! A [`SimplexRead`] is the primary unit of work flowing through the
//! pipeline. Reads are uniquely owned and move from node to node; no node
//! retains a reference after forwarding. During basecalling a read's signal
//! is decomposed into [`CallChunk`]s which are called independently and
//! stitched back together.

use crate::messages::ClientInfo;
use std::sync::Arc;

/// Description of the modified bases a model reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseModInfo {
    /// Modified-base alphabet, e.g. `"AXCYGT"`.
    pub alphabet: String,
    /// Long names of the modifications, space separated.
    pub long_names: String,
    /// Sequence context string for context-dependent models.
    pub context: String,
}

/// One sequencing observation: raw signal plus its derived basecalls.
#[derive(Debug)]
pub struct SimplexRead {
    /// Unique read identifier.
    pub read_id: String,
    /// Raw signal samples, normalised during scaling.
    pub raw_signal: Vec<f32>,
    /// Basecalled sequence (ASCII `ACGT`); empty before basecalling.
    pub seq: Vec<u8>,
    /// Per-base quality string (phred+33); parallel to `seq`.
    pub qstring: Vec<u8>,
    /// One entry per model step: 1 where a new base starts.
    pub moves: Vec<u8>,
    /// Samples per model output step.
    pub model_stride: usize,
    /// Samples trimmed from the front of the signal.
    pub num_trimmed_samples: usize,
    /// Signal shift applied during scaling.
    pub mshift: f32,
    /// Signal scale applied during scaling.
    pub mscale: f32,
    /// Quantised modified-base probabilities, one byte per call position.
    pub base_mod_probs: Vec<u8>,
    /// Descriptor of the modifications in `base_mod_probs`.
    pub base_mod_info: Option<BaseModInfo>,
    /// Estimated polyA tail length in bases, when detection succeeded.
    pub rna_poly_tail_length: Option<u32>,
    /// Per-client context installed by the embedding application.
    pub client_info: Arc<ClientInfo>,
}

impl SimplexRead {
    /// Create a read from a raw signal with default metadata.
    #[must_use]
    pub fn new(read_id: impl Into<String>, raw_signal: Vec<f32>) -> Self {
        Self {
            read_id: read_id.into(),
            raw_signal,
            seq: Vec::new(),
            qstring: Vec::new(),
            moves: Vec::new(),
            model_stride: 0,
            num_trimmed_samples: 0,
            mshift: 0.0,
            mscale: 1.0,
            base_mod_probs: Vec::new(),
            base_mod_info: None,
            rna_poly_tail_length: None,
            client_info: Arc::new(ClientInfo::default()),
        }
    }

    /// Attach a client-info context to the read.
    #[must_use]
    pub fn with_client_info(mut self, client_info: Arc<ClientInfo>) -> Self {
        self.client_info = client_info;
        self
    }

    /// Whether the read carries a basecalled sequence and moves.
    #[must_use]
    pub fn is_basecalled(&self) -> bool {
        !self.seq.is_empty() && !self.moves.is_empty()
    }

    /// Mean base quality over the qstring, in phred units.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_qscore(&self) -> f32 {
        if self.qstring.is_empty() {
            return 0.0;
        }
        let total: u64 = self.qstring.iter().map(|&q| u64::from(q.saturating_sub(b'!'))).sum();
        total as f32 / self.qstring.len() as f32
    }
}

/// A contiguous slice of a read's signal, basecalled independently.
#[derive(Debug)]
pub struct CallChunk {
    /// Index of this chunk within its read.
    pub idx: usize,
    /// Start offset of the chunk in the read's signal, in samples.
    pub input_offset: usize,
    /// Number of signal samples covered by this chunk.
    pub raw_chunk_size: usize,
    /// Called bases for this chunk.
    pub seq: Vec<u8>,
    /// Per-base qualities for this chunk (phred+33).
    pub qstring: Vec<u8>,
    /// Per-model-step moves for this chunk.
    pub moves: Vec<u8>,
}

impl CallChunk {
    /// Create an uncalled chunk covering `[input_offset, input_offset + raw_chunk_size)`.
    #[must_use]
    pub fn new(idx: usize, input_offset: usize, raw_chunk_size: usize) -> Self {
        Self {
            idx,
            input_offset,
            raw_chunk_size,
            seq: Vec::new(),
            qstring: Vec::new(),
            moves: Vec::new(),
        }
    }
}
