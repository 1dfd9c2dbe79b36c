//! Signal scaling and adapter trimming.
//!
//! The scaler is the first transform in the pipeline: it normalises each
//! read's raw signal by its median and median absolute deviation, trims
//! the leading adapter region, and records the shift/scale/trim metadata
//! downstream nodes rely on.

use super::node::{MessageSink, NodeCore};
use crate::errors::Result;
use crate::messages::Message;
use crate::read::SimplexRead;
use crate::stats::NamedStats;
use log::warn;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

/// Scaling factor turning a median absolute deviation into a robust
/// standard deviation estimate.
const MAD_SCALE: f32 = 1.4826;

/// Samples per window when searching for the adapter boundary.
const TRIM_WINDOW: usize = 40;
/// Normalised amplitude above which a sample counts as adapter noise.
const TRIM_THRESHOLD: f32 = 2.4;
/// Outlier samples a window needs to still count as adapter.
const TRIM_MIN_ELEMENTS: usize = 3;
/// Search limit for the adapter boundary, in samples.
const TRIM_MAX_SAMPLES: usize = 8000;
/// Samples always left untouched at the very start.
const TRIM_MIN_START: usize = 10;

/// What to do with reads whose signal is too short to scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortSignalPolicy {
    /// Drop the read with a warning and a counter increment.
    Drop,
    /// Forward the read unmodified.
    Forward,
}

/// Configuration for the scaler node.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    /// Minimum signal length a read needs to be scaled.
    pub min_signal_samples: usize,
    /// Policy for reads shorter than the minimum.
    pub short_signal_policy: ShortSignalPolicy,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self { min_signal_samples: 200, short_signal_policy: ShortSignalPolicy::Drop }
    }
}

struct ScalerState {
    core: NodeCore,
    config: ScalerConfig,
    reads_scaled: AtomicU64,
    reads_too_short: AtomicU64,
}

/// Node that normalises raw signal and trims the leading adapter.
pub struct ScalerNode {
    state: Arc<ScalerState>,
    num_threads: usize,
}

impl ScalerNode {
    /// Create the node and start its workers.
    #[must_use]
    pub fn new(
        sink: Arc<super::NodeHandle>,
        config: ScalerConfig,
        num_threads: usize,
        max_reads: usize,
    ) -> Self {
        let state = Arc::new(ScalerState {
            core: NodeCore::new("scaler", max_reads, Some(sink)),
            config,
            reads_scaled: AtomicU64::new(0),
            reads_too_short: AtomicU64::new(0),
        });
        let node = Self { state, num_threads };
        node.start_input_processing();
        node
    }

    fn start_input_processing(&self) {
        for index in 0..self.num_threads {
            let state = Arc::clone(&self.state);
            let handle = thread::Builder::new()
                .name(format!("scaler-{index}"))
                .spawn(move || Self::input_thread(&state))
                .expect("failed to spawn scaler worker");
            self.state.core.add_worker(handle);
        }
    }

    fn input_thread(state: &ScalerState) {
        while let Some(message) = state.core.get_input_message() {
            let mut read = match message {
                Message::Read(read) => read,
                other => {
                    let _ = state.core.send_message_to_sink(other);
                    continue;
                }
            };

            if read.raw_signal.len() < state.config.min_signal_samples {
                state.reads_too_short.fetch_add(1, Ordering::Relaxed);
                match state.config.short_signal_policy {
                    ShortSignalPolicy::Drop => {
                        warn!(
                            "Read {} signal too short to scale ({} samples); dropping",
                            read.read_id,
                            read.raw_signal.len()
                        );
                    }
                    ShortSignalPolicy::Forward => {
                        warn!(
                            "Read {} signal too short to scale ({} samples); forwarding unscaled",
                            read.read_id,
                            read.raw_signal.len()
                        );
                        let _ = state.core.send_message_to_sink(Message::Read(read));
                    }
                }
                continue;
            }

            scale_and_trim(&mut read);
            state.reads_scaled.fetch_add(1, Ordering::Relaxed);
            let _ = state.core.send_message_to_sink(Message::Read(read));
        }
    }
}

impl MessageSink for ScalerNode {
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
            "reads_scaled".to_string(),
            self.state.reads_scaled.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "reads_too_short".to_string(),
            self.state.reads_too_short.load(Ordering::Relaxed) as f64,
        );
        stats
    }

    fn node_name(&self) -> &'static str {
        "scaler"
    }
}

/// Normalise the signal in place and trim the leading adapter region.
fn scale_and_trim(read: &mut SimplexRead) {
    let (shift, scale) = med_mad(&read.raw_signal);
    for sample in &mut read.raw_signal {
        *sample = (*sample - shift) / scale;
    }
    read.mshift = shift;
    read.mscale = scale;

    let trim = trim_boundary(&read.raw_signal);
    read.raw_signal.drain(..trim);
    read.num_trimmed_samples = trim;
}

/// Median and scaled median absolute deviation of a signal.
fn med_mad(signal: &[f32]) -> (f32, f32) {
    let median = median_of(signal);
    let deviations: Vec<f32> = signal.iter().map(|&x| (x - median).abs()).collect();
    let mad = median_of(&deviations);
    let scale = if mad > f32::EPSILON { MAD_SCALE * mad } else { 1.0 };
    (median, scale)
}

fn median_of(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("signal contains NaN"));
    sorted[sorted.len() / 2]
}

/// Find the first sample after the leading adapter.
///
/// Scans fixed-size windows of the normalised signal; a window counts as
/// adapter while it holds more than `TRIM_MIN_ELEMENTS` samples above the
/// amplitude threshold. The boundary is the end of the last adapter window
/// once one has been seen.
fn trim_boundary(signal: &[f32]) -> usize {
    let limit = signal.len().min(TRIM_MAX_SAMPLES);
    let mut seen_peak = false;
    let mut pos = TRIM_MIN_START;
    while pos + TRIM_WINDOW <= limit {
        let window = &signal[pos..pos + TRIM_WINDOW];
        let num_large = window.iter().filter(|&&x| x > TRIM_THRESHOLD).count();
        if num_large > TRIM_MIN_ELEMENTS {
            seen_peak = true;
        } else if seen_peak {
            return pos + TRIM_WINDOW;
        }
        pos += TRIM_WINDOW;
    }
    TRIM_MIN_START.min(signal.len())
}
