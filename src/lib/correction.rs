//! Correction windows: splitting target alignments into fixed-size windows
//! with exact cigar brackets.
//!
//! Each overlap of a target read is projected onto windows of
//! `window_size` target bases. A window records where in the overlap's
//! cigar it starts and ends (`[cigar_start_idx, cigar_end_idx]` with
//! offsets into the first and last op), so concatenating the windows'
//! projected target ranges reconstructs the overlap's target coverage
//! exactly. Windows are then filtered for long indels, scored by accuracy,
//! and trimmed to the best few per window.

use crate::pipeline::node::{MessageSink, NodeCore};
use crate::errors::Result;
use crate::messages::Message;
use crate::stats::NamedStats;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

/// Default window size in target bases.
pub const DEFAULT_WINDOW_SIZE: usize = 4096;

/// Overlaps kept per window after accuracy ranking.
const TOP_K: usize = 30;

/// Insertions or deletions at least this long disqualify an overlap from a
/// window.
const LONG_INDEL_LEN: u32 = 30;

/// Alignment operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOpType {
    /// Bases match.
    Match,
    /// Bases differ.
    Mismatch,
    /// Insertion relative to the target.
    Ins,
    /// Deletion relative to the target.
    Del,
}

/// One cigar operation.
///
/// Invariant: summing `Match + Mismatch + Ins` lengths gives the query
/// length, `Match + Mismatch + Del` the target length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    /// Operation kind.
    pub op: CigarOpType,
    /// Operation length.
    pub len: u32,
}

impl CigarOp {
    fn consumes_target(self) -> bool {
        matches!(self.op, CigarOpType::Match | CigarOpType::Mismatch | CigarOpType::Del)
    }

    fn consumes_query(self) -> bool {
        matches!(self.op, CigarOpType::Match | CigarOpType::Mismatch | CigarOpType::Ins)
    }
}

/// One overlap of a query read against the target read.
#[derive(Debug, Clone)]
pub struct Overlap {
    /// Query start within the query read.
    pub qstart: usize,
    /// Query end within the query read.
    pub qend: usize,
    /// Query read length.
    pub qlen: usize,
    /// Target start within the target read.
    pub tstart: usize,
    /// Target end within the target read.
    pub tend: usize,
    /// Target read length.
    pub tlen: usize,
    /// Whether the query aligns on the forward strand.
    pub fwd: bool,
}

/// All overlaps for one target read.
#[derive(Debug, Default)]
pub struct CorrectionAlignments {
    /// Target read name.
    pub read_name: String,
    /// Target read sequence.
    pub read_seq: Vec<u8>,
    /// Query read names, parallel to `overlaps`.
    pub qnames: Vec<String>,
    /// The overlaps.
    pub overlaps: Vec<Overlap>,
    /// Per-overlap cigars.
    pub cigars: Vec<Vec<CigarOp>>,
    /// Per-overlap query sequences.
    pub seqs: Vec<Vec<u8>>,
}

/// Projection of one overlap onto one target window.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapWindow {
    /// Index of the source overlap in its [`CorrectionAlignments`].
    pub overlap_idx: usize,
    /// Target position where this window's slice starts.
    pub tstart: usize,
    /// Query position where this window's slice starts.
    pub qstart: usize,
    /// Query position where this window's slice ends.
    pub qend: usize,
    /// Index of the first cigar op in the bracket.
    pub cigar_start_idx: usize,
    /// Offset into the first cigar op.
    pub cigar_start_offset: usize,
    /// Index of the last cigar op in the bracket (exclusive when the
    /// offset is zero).
    pub cigar_end_idx: usize,
    /// Offset into the last cigar op.
    pub cigar_end_offset: usize,
    /// Alignment accuracy over the bracket, filled by feature extraction.
    pub accuracy: f32,
}

/// Split every overlap into per-window slices with exact cigar brackets.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn extract_windows(
    alignments: &CorrectionAlignments,
    window_size: usize,
) -> Vec<Vec<OverlapWindow>> {
    let tlen = alignments.read_seq.len();
    let n_windows = tlen.div_ceil(window_size);
    let mut windows: Vec<Vec<OverlapWindow>> = vec![Vec::new(); n_windows];

    for (overlap_idx, overlap) in alignments.overlaps.iter().enumerate() {
        let cigar = &alignments.cigars[overlap_idx];

        // Overlaps shorter than one window contribute nothing.
        if overlap.tend - overlap.tstart < window_size {
            continue;
        }

        let zeroth_window_thresh = window_size / 10;
        let nth_window_thresh = overlap.tlen.saturating_sub(zeroth_window_thresh);

        let first_window = if overlap.tstart < zeroth_window_thresh {
            0
        } else {
            overlap.tstart.div_ceil(window_size)
        };
        let last_window = if overlap.tend > nth_window_thresh {
            (overlap.tend - 1) / window_size + 1
        } else {
            overlap.tend / window_size
        };
        if last_window <= first_window {
            continue;
        }

        let tstart = overlap.tstart;
        let mut tpos = overlap.tstart;
        let mut qpos = 0usize;

        let mut t_window_start = 0usize;
        let mut q_window_start = 0usize;
        let mut cigar_start: Option<(usize, usize)> = None;

        if tpos % window_size == 0 || tstart < zeroth_window_thresh {
            t_window_start = tpos;
            q_window_start = qpos;
            cigar_start = Some((0, 0));
        }

        for (cigar_idx, op) in cigar.iter().enumerate() {
            let (tnew, qnew) = match op.op {
                CigarOpType::Match | CigarOpType::Mismatch => {
                    (tpos + op.len as usize, qpos + op.len as usize)
                }
                CigarOpType::Del => (tpos + op.len as usize, qpos),
                CigarOpType::Ins => {
                    qpos += op.len as usize;
                    continue;
                }
            };

            let current_w = tpos / window_size;
            let new_w = tnew / window_size;
            let diff_w = new_w - current_w;
            if diff_w == 0 {
                tpos = tnew;
                qpos = qnew;
                continue;
            }

            let is_aligned = matches!(op.op, CigarOpType::Match | CigarOpType::Mismatch);

            // Windows fully crossed inside this single op.
            for i in 1..diff_w {
                let offset = (current_w + i) * window_size - tpos;
                let q_start_new = if is_aligned { qpos + offset } else { qpos };

                if let Some((cs_idx, cs_off)) = cigar_start {
                    if let Some(window) = windows.get_mut(current_w + i - 1) {
                        window.push(OverlapWindow {
                            overlap_idx,
                            tstart: t_window_start,
                            qstart: q_window_start,
                            qend: q_start_new,
                            cigar_start_idx: cs_idx,
                            cigar_start_offset: cs_off,
                            cigar_end_idx: cigar_idx,
                            cigar_end_offset: offset,
                            accuracy: 0.0,
                        });
                    }
                }
                t_window_start = tpos + offset;
                q_window_start = if is_aligned { qpos + offset } else { qpos };
                cigar_start = Some((cigar_idx, offset));
            }

            // The window boundary this op finally crosses.
            let offset = new_w * window_size - tpos;
            let mut qend = if is_aligned { qpos + offset } else { qpos };

            let (cigar_end_idx, cigar_end_offset) = if tnew == new_w * window_size {
                // Boundary falls exactly between ops; absorb a following
                // insertion into this window.
                if cigar.get(cigar_idx + 1).is_some_and(|next| next.op == CigarOpType::Ins) {
                    qend += cigar[cigar_idx + 1].len as usize;
                    (cigar_idx + 2, 0)
                } else {
                    (cigar_idx + 1, 0)
                }
            } else {
                (cigar_idx, offset)
            };

            if let Some((cs_idx, cs_off)) = cigar_start {
                if new_w >= 1 {
                    if let Some(window) = windows.get_mut(new_w - 1) {
                        window.push(OverlapWindow {
                            overlap_idx,
                            tstart: t_window_start,
                            qstart: q_window_start,
                            qend,
                            cigar_start_idx: cs_idx,
                            cigar_start_offset: cs_off,
                            cigar_end_idx,
                            cigar_end_offset,
                            accuracy: 0.0,
                        });
                    }
                }
            }
            t_window_start = tpos + offset;
            q_window_start = qend;
            cigar_start = Some((cigar_end_idx, cigar_end_offset));

            tpos = tnew;
            qpos = qnew;
        }

        // Trailing partial window at the end of the target.
        if tpos > nth_window_thresh && tpos % window_size != 0 {
            if let Some((cs_idx, cs_off)) = cigar_start {
                if last_window >= 1 {
                    if let Some(window) = windows.get_mut(last_window - 1) {
                        window.push(OverlapWindow {
                            overlap_idx,
                            tstart: t_window_start,
                            qstart: q_window_start,
                            qend: qpos,
                            cigar_start_idx: cs_idx,
                            cigar_start_offset: cs_off,
                            cigar_end_idx: cigar.len(),
                            cigar_end_offset: 0,
                            accuracy: 0.0,
                        });
                    }
                }
            }
        }
    }

    windows
}

/// Whether an overlap window contains a disqualifying long indel.
fn has_long_indel(window: &OverlapWindow, alignments: &CorrectionAlignments) -> bool {
    let cigar = &alignments.cigars[window.overlap_idx];
    let end = (window.cigar_end_idx + 1).min(cigar.len());
    cigar[window.cigar_start_idx..end].iter().any(|op| {
        matches!(op.op, CigarOpType::Ins | CigarOpType::Del) && op.len >= LONG_INDEL_LEN
    })
}

/// Reverse complement of a nucleotide sequence.
fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|base| match base {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            other => *other,
        })
        .collect()
}

/// Alignment accuracy of one window's cigar bracket.
#[allow(clippy::cast_precision_loss)]
fn calculate_accuracy(
    window: &OverlapWindow,
    alignments: &CorrectionAlignments,
    win_idx: usize,
    win_len: usize,
    window_size: usize,
) -> f32 {
    let tstart = window.tstart;
    let tend = win_idx * window_size + win_len;

    let overlap = &alignments.overlaps[window.overlap_idx];
    let (qstart, qend) = if overlap.fwd {
        (overlap.qstart + window.qstart, overlap.qstart + window.qend)
    } else {
        (overlap.qend - window.qend, overlap.qend - window.qstart)
    };

    let tseq = &alignments.read_seq[tstart..tend.min(alignments.read_seq.len())];
    let query = &alignments.seqs[window.overlap_idx];
    let qslice = &query[qstart.min(query.len())..qend.min(query.len())];
    let qseq = if overlap.fwd { qslice.to_vec() } else { reverse_complement(qslice) };

    let cigar = &alignments.cigars[window.overlap_idx];
    let (mut tpos, mut qpos) = (0usize, 0usize);
    let (mut m, mut s, mut i, mut d) = (0usize, 0usize, 0usize, 0usize);

    for idx in window.cigar_start_idx..=window.cigar_end_idx.min(cigar.len().saturating_sub(1)) {
        let op = cigar[idx];
        let len = if window.cigar_start_idx == window.cigar_end_idx {
            window.cigar_end_offset - window.cigar_start_offset
        } else if idx == window.cigar_start_idx {
            op.len as usize - window.cigar_start_offset
        } else if idx == window.cigar_end_idx {
            window.cigar_end_offset
        } else {
            op.len as usize
        };
        if len == 0 {
            break;
        }

        match op.op {
            CigarOpType::Match | CigarOpType::Mismatch => {
                for j in 0..len {
                    match (tseq.get(tpos + j), qseq.get(qpos + j)) {
                        (Some(tbase), Some(qbase)) if tbase == qbase => m += 1,
                        _ => s += 1,
                    }
                }
                tpos += len;
                qpos += len;
            }
            CigarOpType::Ins => {
                i += len;
                qpos += len;
            }
            CigarOpType::Del => {
                d += len;
                tpos += len;
            }
        }
    }

    let total = m + s + i + d;
    if total == 0 { 0.0 } else { m as f32 / total as f32 }
}

/// Maximum insertion run observed at each target position of a window.
#[must_use]
pub fn get_max_ins_for_window(
    windows: &[OverlapWindow],
    alignments: &CorrectionAlignments,
    tstart: usize,
    win_len: usize,
) -> Vec<u32> {
    let mut max_ins = vec![0u32; win_len];

    for window in windows {
        let mut tpos = window.tstart - tstart;
        let cigar = &alignments.cigars[window.overlap_idx];
        let cigar_len = window.cigar_end_idx - window.cigar_start_idx + 1;

        for idx in window.cigar_start_idx..=window.cigar_end_idx.min(cigar.len().saturating_sub(1))
        {
            let op = cigar[idx];
            if op.op == CigarOpType::Ins {
                if tpos > 0 {
                    if let Some(slot) = max_ins.get_mut(tpos - 1) {
                        *slot = (*slot).max(op.len);
                    }
                }
                continue;
            }

            let advance = if cigar_len == 1 {
                window.cigar_end_offset - window.cigar_start_offset
            } else if idx == window.cigar_start_idx {
                op.len as usize - window.cigar_start_offset
            } else if idx == window.cigar_end_idx {
                window.cigar_end_offset
            } else {
                op.len as usize
            };
            tpos += advance;
        }
    }

    max_ins
}

/// Per-window output of feature extraction.
#[derive(Debug)]
pub struct WindowFeatures {
    /// Surviving overlaps, best accuracy first, at most `TOP_K`.
    pub overlaps: Vec<OverlapWindow>,
    /// Maximum insertion run per target position in the window.
    pub max_ins: Vec<u32>,
}

/// Filter, score, and rank each window's overlaps.
#[must_use]
pub fn extract_features(
    mut windows: Vec<Vec<OverlapWindow>>,
    alignments: &CorrectionAlignments,
    window_size: usize,
) -> Vec<WindowFeatures> {
    let tlen = alignments.read_seq.len();
    let n_windows = windows.len();

    windows
        .iter_mut()
        .enumerate()
        .map(|(w, overlap_windows)| {
            let win_len =
                if w + 1 == n_windows { tlen - window_size * w } else { window_size };

            let mut filtered: Vec<OverlapWindow> = overlap_windows
                .drain(..)
                .filter(|window| !has_long_indel(window, alignments))
                .collect();

            for window in &mut filtered {
                window.accuracy =
                    calculate_accuracy(window, alignments, w, win_len, window_size);
            }
            filtered.sort_by(|a, b| {
                b.accuracy.partial_cmp(&a.accuracy).unwrap_or(std::cmp::Ordering::Equal)
            });
            filtered.truncate(TOP_K);

            let max_ins =
                get_max_ins_for_window(&filtered, alignments, w * window_size, win_len);
            WindowFeatures { overlaps: filtered, max_ins }
        })
        .collect()
}

/// Configuration for the correction node.
#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    /// Target-coordinate window size.
    pub window_size: usize,
    /// When set, only alignments for this read id are processed; everything
    /// else is forwarded untouched. Debugging aid.
    pub debug_read_id: Option<String>,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self { window_size: DEFAULT_WINDOW_SIZE, debug_read_id: None }
    }
}

struct CorrectionState {
    core: NodeCore,
    config: CorrectionConfig,
    alignments_processed: AtomicU64,
    alignments_skipped: AtomicU64,
    windows_extracted: AtomicU64,
}

/// Node that windows correction alignments and extracts their features.
pub struct CorrectionNode {
    state: Arc<CorrectionState>,
    num_threads: usize,
}

impl CorrectionNode {
    /// Create the node and start its workers.
    #[must_use]
    pub fn new(
        sink: Arc<crate::pipeline::NodeHandle>,
        config: CorrectionConfig,
        num_threads: usize,
        max_messages: usize,
    ) -> Self {
        let state = Arc::new(CorrectionState {
            core: NodeCore::new("correction", max_messages, Some(sink)),
            config,
            alignments_processed: AtomicU64::new(0),
            alignments_skipped: AtomicU64::new(0),
            windows_extracted: AtomicU64::new(0),
        });
        let node = Self { state, num_threads };
        node.start_input_processing();
        node
    }

    fn start_input_processing(&self) {
        for index in 0..self.num_threads {
            let state = Arc::clone(&self.state);
            let handle = thread::Builder::new()
                .name(format!("correction-{index}"))
                .spawn(move || Self::input_thread(&state))
                .expect("failed to spawn correction worker");
            self.state.core.add_worker(handle);
        }
    }

    fn input_thread(state: &CorrectionState) {
        while let Some(message) = state.core.get_input_message() {
            let alignments = match message {
                Message::CorrectionAlignments(alignments) => alignments,
                other => {
                    let _ = state.core.send_message_to_sink(other);
                    continue;
                }
            };

            let gated_out = state
                .config
                .debug_read_id
                .as_ref()
                .is_some_and(|gate| *gate != alignments.read_name);
            if gated_out {
                state.alignments_skipped.fetch_add(1, Ordering::Relaxed);
                let _ = state.core.send_message_to_sink(Message::CorrectionAlignments(alignments));
                continue;
            }

            let windows = extract_windows(&alignments, state.config.window_size);
            let features = extract_features(windows, &alignments, state.config.window_size);
            let num_windows: u64 =
                features.iter().map(|f| f.overlaps.len() as u64).sum();
            state.windows_extracted.fetch_add(num_windows, Ordering::Relaxed);
            state.alignments_processed.fetch_add(1, Ordering::Relaxed);

            let _ = state.core.send_message_to_sink(Message::CorrectionAlignments(alignments));
        }
    }
}

impl MessageSink for CorrectionNode {
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
            "alignments_processed".to_string(),
            self.state.alignments_processed.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "alignments_skipped".to_string(),
            self.state.alignments_skipped.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "windows_extracted".to_string(),
            self.state.windows_extracted.load(Ordering::Relaxed) as f64,
        );
        stats
    }

    fn node_name(&self) -> &'static str {
        "correction"
    }
}
