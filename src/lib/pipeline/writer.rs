//! Terminal HTS writer node.
//!
//! Converts basecalled reads to unmapped records (or FASTQ) and writes
//! them in the configured output mode. In sorted mode records are routed
//! through the [`SortedBamSink`]; `finalise` must be called after the
//! pipeline has terminated to merge and index the output.

use super::node::{MessageSink, NodeCore};
use crate::errors::{PorecallError, Result};
use crate::hts::SortedBamSink;
use crate::messages::Message;
use crate::read::SimplexRead;
use crate::stats::NamedStats;
use bstr::BString;
use log::warn;
use noodles::bam;
use noodles::bgzf;
use noodles::fastq;
use noodles::sam;
use noodles::sam::Header;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;
use noodles::sam::alignment::record_buf::data::field::value::Array;
use noodles::sam::alignment::record_buf::{QualityScores, RecordBuf, Sequence};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// FASTQ text.
    Fastq,
    /// SAM text.
    Sam,
    /// Compressed BAM.
    Bam,
    /// Uncompressed BAM.
    Ubam,
    /// Coordinate-sorted, indexed BAM.
    SortedBam,
}

enum WriterBackend {
    Fastq(fastq::io::Writer<BufWriter<File>>),
    Sam(sam::io::Writer<BufWriter<File>>),
    Bam(bam::io::Writer<bgzf::io::Writer<File>>),
    Sorted(SortedBamSink),
    Finished,
}

struct WriterState {
    core: NodeCore,
    backend: Mutex<WriterBackend>,
    records_written: AtomicU64,
    records_failed: AtomicU64,
    messages_discarded: AtomicU64,
}

/// Terminal node writing reads in the configured output mode.
pub struct HtsWriterNode {
    state: Arc<WriterState>,
}

impl HtsWriterNode {
    /// Open the output and start the writer worker.
    ///
    /// # Errors
    ///
    /// Returns I/O and parameter errors from opening the output.
    pub fn new(
        output_path: &Path,
        mode: OutputMode,
        header: Header,
        sorted_buffer_bytes: u64,
        max_reads: usize,
    ) -> Result<Self> {
        let backend = match mode {
            OutputMode::Fastq => {
                let file = File::create(output_path)?;
                WriterBackend::Fastq(fastq::io::Writer::new(BufWriter::new(file)))
            }
            OutputMode::Sam => {
                let file = File::create(output_path)?;
                let mut writer = sam::io::Writer::new(BufWriter::new(file));
                writer.write_header(&header)?;
                WriterBackend::Sam(writer)
            }
            OutputMode::Bam | OutputMode::Ubam => {
                let file = File::create(output_path)?;
                let level: u8 = if mode == OutputMode::Ubam { 0 } else { 6 };
                let compression = bgzf::io::writer::CompressionLevel::new(level)
                    .unwrap_or_default();
                let bgzf_writer = bgzf::io::writer::Builder::default()
                    .set_compression_level(compression)
                    .build_from_writer(file);
                let mut writer = bam::io::Writer::from(bgzf_writer);
                writer.write_header(&header)?;
                WriterBackend::Bam(writer)
            }
            OutputMode::SortedBam => {
                WriterBackend::Sorted(SortedBamSink::new(output_path, header, sorted_buffer_bytes)?)
            }
        };

        let state = Arc::new(WriterState {
            core: NodeCore::new("writer", max_reads, None),
            backend: Mutex::new(backend),
            records_written: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            messages_discarded: AtomicU64::new(0),
        });
        let node = Self { state };
        node.start_input_processing();
        Ok(node)
    }

    fn start_input_processing(&self) {
        let state = Arc::clone(&self.state);
        let handle = thread::Builder::new()
            .name("writer-0".to_string())
            .spawn(move || Self::input_thread(&state))
            .expect("failed to spawn writer worker");
        self.state.core.add_worker(handle);
    }

    fn input_thread(state: &WriterState) {
        while let Some(message) = state.core.get_input_message() {
            let read = match message {
                Message::Read(read) => read,
                _ => {
                    // Terminal node: variants it does not write are dropped,
                    // visibly.
                    state.messages_discarded.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            let result = {
                let mut backend = state.backend.lock();
                Self::write_read(&mut backend, &read)
            };
            match result {
                Ok(()) => {
                    state.records_written.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => {
                    warn!("Failed to write read {}: {error}", read.read_id);
                    state.records_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn write_read(backend: &mut WriterBackend, read: &SimplexRead) -> Result<()> {
        match backend {
            WriterBackend::Fastq(writer) => {
                let record = fastq::Record::new(
                    fastq::record::Definition::new(read.read_id.clone(), ""),
                    read.seq.clone(),
                    read.qstring.clone(),
                );
                writer.write_record(&record)?;
            }
            WriterBackend::Sam(writer) => {
                let record = read_to_record(read);
                writer.write_alignment_record(&Header::default(), &record)?;
            }
            WriterBackend::Bam(writer) => {
                let record = read_to_record(read);
                writer.write_alignment_record(&Header::default(), &record)?;
            }
            WriterBackend::Sorted(sink) => {
                sink.write(read_to_record(read))?;
            }
            WriterBackend::Finished => {
                return Err(PorecallError::QueueClosed);
            }
        }
        Ok(())
    }

    /// Flush and close the output; in sorted mode, merge and index.
    ///
    /// Call after the pipeline has terminated. Progress is reported
    /// through `progress` as a percentage.
    ///
    /// # Errors
    ///
    /// Surfaces finalisation errors from the sorted sink and I/O errors
    /// from closing the other writers.
    pub fn finalise(&self, progress: &(dyn Fn(u64) + Send + Sync)) -> Result<()> {
        let mut backend = self.state.backend.lock();
        match &mut *backend {
            WriterBackend::Sorted(sink) => sink.finalise(progress)?,
            WriterBackend::Bam(writer) => {
                writer.try_finish()?;
                progress(100);
            }
            WriterBackend::Fastq(_) | WriterBackend::Sam(_) => progress(100),
            WriterBackend::Finished => {}
        }
        *backend = WriterBackend::Finished;
        Ok(())
    }

    /// Records written so far.
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.state.records_written.load(Ordering::Relaxed)
    }
}

/// Convert a basecalled read to an unmapped alignment record.
fn read_to_record(read: &SimplexRead) -> RecordBuf {
    let mut record = RecordBuf::default();
    *record.name_mut() = Some(BString::from(read.read_id.as_str()));
    *record.flags_mut() = Flags::UNMAPPED;
    *record.sequence_mut() = Sequence::from(read.seq.clone());
    let quals: Vec<u8> = read.qstring.iter().map(|q| q.saturating_sub(b'!')).collect();
    *record.quality_scores_mut() = QualityScores::from(quals);

    let data = record.data_mut();
    data.insert(Tag::from([b'q', b's']), Value::from(read.mean_qscore()));
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    {
        data.insert(Tag::from([b'n', b's']), Value::from(read.raw_signal.len() as i32));
        data.insert(Tag::from([b't', b's']), Value::from(read.num_trimmed_samples as i32));
        if let Some(tail_length) = read.rna_poly_tail_length {
            data.insert(Tag::from([b'p', b't']), Value::from(tail_length as i32));
        }
    }
    if !read.moves.is_empty() {
        data.insert(Tag::from([b'm', b'v']), Value::Array(Array::UInt8(read.moves.clone())));
    }
    if !read.base_mod_probs.is_empty() {
        data.insert(Tag::from([b'M', b'L']), Value::Array(Array::UInt8(read.base_mod_probs.clone())));
    }
    record
}

impl MessageSink for HtsWriterNode {
    fn push_message(&self, message: Message) -> Result<()> {
        self.state.core.push_message(message)
    }

    fn terminate(&self) {
        self.state.core.stop_input_processing();
    }

    fn restart(&self) {
        self.state.core.restart_input_queue();
        self.start_input_processing();
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample_stats(&self) -> NamedStats {
        let mut stats = self.state.core.queue_stats();
        stats.insert(
            "records_written".to_string(),
            self.state.records_written.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "records_failed".to_string(),
            self.state.records_failed.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "messages_discarded".to_string(),
            self.state.messages_discarded.load(Ordering::Relaxed) as f64,
        );
        stats
    }

    fn node_name(&self) -> &'static str {
        "writer"
    }
}
