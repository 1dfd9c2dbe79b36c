//! PolyA tail calculator contract.
//!
//! Tail detection is a domain heuristic that plugs into the pipeline: the
//! embedding application installs a [`PolyTailCalculator`] into a read's
//! client-info context, and the polyA node looks it up by type. The
//! pipeline never instantiates calculators itself.

use crate::read::SimplexRead;

/// Where to look for the tail signal, and on which strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalAnchorInfo {
    /// Whether the read is on the forward strand. Always `false` for direct
    /// RNA: the molecule is single stranded and sequenced 3' to 5', so the
    /// search orientation is fixed.
    pub is_fwd_strand: bool,
    /// Approximate sample index where the tail starts or ends, when found.
    pub signal_anchor: Option<usize>,
    /// Adapter bases to subtract from the final tail count (the adapter may
    /// itself end in several As or Ts).
    pub trailing_adapter_bases: u32,
}

impl SignalAnchorInfo {
    /// An anchor-not-found result.
    #[must_use]
    pub fn not_found() -> Self {
        Self { is_fwd_strand: false, signal_anchor: None, trailing_adapter_bases: 0 }
    }
}

/// Estimates polyA/polyT tail lengths from a basecalled read.
pub trait PolyTailCalculator: Send + Sync + 'static {
    /// Locate the approximate tail anchor in signal space.
    fn determine_signal_anchor_and_strand(&self, read: &SimplexRead) -> SignalAnchorInfo;

    /// Estimate the tail length in bases given an anchor.
    ///
    /// Returns a value outside `(0, max_tail_length)` when estimation fails;
    /// the node records such reads as not called.
    fn calculate_num_bases(&self, read: &SimplexRead, anchor: &SignalAnchorInfo) -> i64;

    /// Upper bound on plausible tail lengths, in bases.
    fn max_tail_length(&self) -> i64 {
        750
    }
}
