//! Development signal loader.
//!
//! Real deployments feed the pipeline from sequencing files (POD5/FAST5)
//! through an external loader that calls [`crate::pipeline::Pipeline::push_message`].
//! This module reads a simple tab-separated text format instead, one read
//! per line:
//!
//! ```text
//! <read_id>\t<comma-separated float samples>
//! ```
//!
//! Lines starting with `#` are skipped.

use crate::errors::Result;
use crate::messages::ClientInfo;
use crate::pipeline::Pipeline;
use crate::progress::ProgressTracker;
use crate::read::SimplexRead;
use log::warn;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Load a signal file, pushing each read into the pipeline head.
///
/// Malformed lines are logged and skipped. Returns the number of reads
/// pushed.
///
/// # Errors
///
/// Returns I/O errors from reading the file and `QueueClosed` when the
/// pipeline has been terminated.
pub fn load_signal_file(
    path: &Path,
    pipeline: &Pipeline,
    client_info: &Arc<ClientInfo>,
) -> Result<u64> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let progress = ProgressTracker::new("Loaded reads").with_interval(1000);

    let mut loaded = 0u64;
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some(read) = parse_line(&line) else {
            warn!("Skipping malformed signal line {}", line_number + 1);
            continue;
        };

        let read = read.with_client_info(Arc::clone(client_info));
        pipeline.push_message(read.into())?;
        loaded += 1;
        progress.log_if_needed(1);
    }
    progress.log_final();
    Ok(loaded)
}

fn parse_line(line: &str) -> Option<SimplexRead> {
    let (read_id, samples) = line.split_once('\t')?;
    if read_id.is_empty() {
        return None;
    }
    let signal: Option<Vec<f32>> =
        samples.split(',').map(|sample| sample.trim().parse::<f32>().ok()).collect();
    let signal = signal?;
    if signal.is_empty() {
        return None;
    }
    Some(SimplexRead::new(read_id, signal))
}
