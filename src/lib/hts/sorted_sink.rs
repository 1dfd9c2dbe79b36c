//! Coordinate-sorting BAM sink.
//!
//! Records arrive in arbitrary order and are buffered in memory with their
//! sorting key. When the buffer fills, its contents are drained in key
//! order into a temporary file `<output>.<k>.tmp`; every temp file carries
//! the same header. `finalise` writes the last buffer, then renames a lone
//! temp file or k-way merges several into the output, verifying the temp
//! headers are byte-identical first. On any merge failure the temp files
//! are retained on disk for manual recovery. A mapped header gets a BAI
//! index beside the output.

use super::index::build_bai_index;
use crate::config::MINIMUM_SORTED_BUFFER_BYTES;
use crate::errors::{PorecallError, Result};
use bstr::BString;
use log::{error, info};
use noodles::bam;
use noodles::sam::Header;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::record_buf::RecordBuf;
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::header::tag as header_tag;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Progress percentage at the start of merging.
const PERCENT_START_MERGING: u64 = 5;
/// Progress percentage at the start of indexing.
const PERCENT_START_INDEXING: u64 = 50;

/// Callback invoked with a completion percentage in `0..=100`.
pub type ProgressCallback<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Sorting key: `(tid << 32) | pos`, with unmapped records last.
#[must_use]
pub fn calculate_sorting_key(record: &RecordBuf) -> u64 {
    match (record.reference_sequence_id(), record.alignment_start()) {
        (Some(tid), Some(pos)) => {
            let tid = tid as u64;
            let pos = (pos.get() - 1) as u64;
            (tid << 32) | (pos & 0xFFFF_FFFF)
        }
        _ => u64::MAX,
    }
}

/// Estimate the heap memory a buffered record occupies.
fn estimate_record_size(record: &RecordBuf) -> usize {
    std::mem::size_of::<RecordBuf>()
        + record.name().map_or(0, |name| name.len())
        + record.sequence().len()
        + record.quality_scores().as_ref().len()
        + record.cigar().as_ref().len() * 4
        + 64
}

/// A BAM sink that buffers, spills, and merges into coordinate order.
pub struct SortedBamSink {
    output_path: PathBuf,
    header: Header,
    header_bytes: Vec<u8>,
    buffer: Vec<(u64, RecordBuf)>,
    buffer_bytes: usize,
    buffer_capacity: usize,
    temp_files: Vec<PathBuf>,
    num_records: u64,
    finalised: bool,
}

impl SortedBamSink {
    /// Create a sink writing to `output_path` with the given record buffer
    /// size.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` when the buffer is below the 100 KB
    /// minimum.
    pub fn new(output_path: &Path, header: Header, buffer_bytes: u64) -> Result<Self> {
        if buffer_bytes < MINIMUM_SORTED_BUFFER_BYTES {
            return Err(PorecallError::InvalidParameter {
                parameter: "sorted_bam_buffer_bytes".to_string(),
                reason: format!(
                    "must be at least {MINIMUM_SORTED_BUFFER_BYTES} ({} KB)",
                    MINIMUM_SORTED_BUFFER_BYTES / 1000
                ),
            });
        }
        let header_bytes = serialize_header(&header)?;
        Ok(Self {
            output_path: output_path.to_path_buf(),
            header,
            header_bytes,
            buffer: Vec::new(),
            buffer_bytes: 0,
            buffer_capacity: usize::try_from(buffer_bytes).unwrap_or(usize::MAX),
            temp_files: Vec::new(),
            num_records: 0,
            finalised: false,
        })
    }

    /// Number of records written so far.
    #[must_use]
    pub fn num_records(&self) -> u64 {
        self.num_records
    }

    /// Number of temporary files spilled so far.
    #[must_use]
    pub fn num_temp_files(&self) -> usize {
        self.temp_files.len()
    }

    /// Buffer a record, spilling a temp file when it does not fit.
    ///
    /// # Errors
    ///
    /// Returns `TempFileIo` when a spill fails.
    pub fn write(&mut self, record: RecordBuf) -> Result<()> {
        self.num_records += 1;
        let record_size = estimate_record_size(&record);
        if !self.buffer.is_empty() && self.buffer_bytes + record_size > self.buffer_capacity {
            // The record that does not fit is written into this flush, in
            // key order with the buffered ones.
            return self.flush_temp_file(Some(record));
        }
        self.buffer_bytes += record_size;
        self.buffer.push((calculate_sorting_key(&record), record));
        Ok(())
    }

    /// Drain the buffer (plus an optional overflow record) into a new
    /// temporary file in key order.
    fn flush_temp_file(&mut self, last_record: Option<RecordBuf>) -> Result<()> {
        if self.buffer.is_empty() && last_record.is_none() {
            return Ok(());
        }

        let file_index = self.temp_files.len();
        let temp_path = PathBuf::from(format!("{}.{file_index}.tmp", self.output_path.display()));

        let mut entries = std::mem::take(&mut self.buffer);
        if let Some(record) = last_record {
            entries.push((calculate_sorting_key(&record), record));
        }
        // Stable sort keeps same-key records in arrival order.
        entries.sort_by_key(|(key, _)| *key);

        let result = (|| -> std::io::Result<()> {
            let file = File::create(&temp_path)?;
            let mut writer = bam::io::Writer::new(file);
            writer.write_header(&self.header)?;
            for (_, record) in &entries {
                writer.write_alignment_record(&self.header, record)?;
            }
            writer.try_finish()?;
            Ok(())
        })();
        result.map_err(|source| PorecallError::TempFileIo { path: temp_path.clone(), source })?;

        self.temp_files.push(temp_path);
        self.buffer_bytes = 0;
        Ok(())
    }

    /// Flush, merge, and index the output.
    ///
    /// Idempotent: a second call logs an error and returns. Progress runs
    /// 0-5 while buffering, 5-50 while merging (per record), 50-100 while
    /// indexing.
    ///
    /// # Errors
    ///
    /// Surfaces `TempFileIo` and `HeaderMismatch` from the merge and
    /// `IndexBuildFailed` from indexing. Temp files are retained on merge
    /// failure.
    pub fn finalise(&mut self, progress: ProgressCallback<'_>) -> Result<()> {
        if std::mem::replace(&mut self.finalised, true) {
            error!("finalise() called twice on a sorted BAM sink. Ignoring second call.");
            return Ok(());
        }
        progress(0);

        self.flush_temp_file(None)?;

        let file_is_mapped = !self.header.reference_sequences().is_empty();

        if self.temp_files.is_empty() {
            progress(100);
            return Ok(());
        }

        if self.temp_files.len() == 1 {
            let only = self.temp_files.pop().expect("one temp file");
            std::fs::rename(&only, &self.output_path)
                .map_err(|source| PorecallError::TempFileIo { path: only, source })?;
        } else {
            progress(PERCENT_START_MERGING);
            self.merge_temp_files(progress)?;
            // Merge succeeded; the temp files can go.
            let temp_files = std::mem::take(&mut self.temp_files);
            for temp_file in temp_files {
                let _ = std::fs::remove_file(temp_file);
            }
        }

        if file_is_mapped {
            progress(PERCENT_START_INDEXING);
            let index_path = build_bai_index(&self.output_path)?;
            info!("Wrote BAM index: {}", index_path.display());
        }

        progress(100);
        Ok(())
    }

    /// K-way merge of the temp files into the output.
    fn merge_temp_files(&mut self, progress: ProgressCallback<'_>) -> Result<()> {
        let mut readers = Vec::with_capacity(self.temp_files.len());
        for temp_path in &self.temp_files {
            let file = File::open(temp_path)
                .map_err(|source| PorecallError::TempFileIo { path: temp_path.clone(), source })?;
            let mut reader = bam::io::Reader::new(BufReader::new(file));
            let header = reader
                .read_header()
                .map_err(|source| PorecallError::TempFileIo { path: temp_path.clone(), source })?;

            // All temp files were written by this sink, so their headers
            // must be byte-identical.
            let header_bytes = serialize_header(&header)?;
            if header_bytes != self.header_bytes {
                return Err(PorecallError::HeaderMismatch { path: temp_path.clone() });
            }
            readers.push(reader);
        }

        let output_header = self.create_output_header();
        let out_file = File::create(&self.output_path).map_err(|source| {
            PorecallError::TempFileIo { path: self.output_path.clone(), source }
        })?;
        let mut writer = bam::io::Writer::new(out_file);
        writer
            .write_header(&output_header)
            .map_err(|source| PorecallError::TempFileIo { path: self.output_path.clone(), source })?;

        // Seed the heap with the first record of every file; ties resolve
        // to the lowest file index.
        let mut heap: BinaryHeap<Reverse<MergeEntry>> = BinaryHeap::with_capacity(readers.len());
        for (file_idx, reader) in readers.iter_mut().enumerate() {
            if let Some(record) = self.read_next(reader, file_idx)? {
                heap.push(Reverse(MergeEntry {
                    key: calculate_sorting_key(&record),
                    file_idx,
                    record,
                }));
            }
        }

        let mut merged = 0u64;
        let total = self.num_records.max(1);
        while let Some(Reverse(entry)) = heap.pop() {
            writer.write_alignment_record(&output_header, &entry.record).map_err(|source| {
                PorecallError::TempFileIo { path: self.output_path.clone(), source }
            })?;
            merged += 1;
            progress(
                PERCENT_START_MERGING
                    + (PERCENT_START_INDEXING - PERCENT_START_MERGING) * merged / total,
            );

            if let Some(record) = self.read_next(&mut readers[entry.file_idx], entry.file_idx)? {
                heap.push(Reverse(MergeEntry {
                    key: calculate_sorting_key(&record),
                    file_idx: entry.file_idx,
                    record,
                }));
            }
        }

        writer.try_finish().map_err(|source| PorecallError::TempFileIo {
            path: self.output_path.clone(),
            source,
        })?;
        info!("Merge complete: {merged} records merged");
        Ok(())
    }

    fn read_next(
        &self,
        reader: &mut bam::io::Reader<noodles::bgzf::io::Reader<BufReader<File>>>,
        file_idx: usize,
    ) -> Result<Option<RecordBuf>> {
        let mut record = RecordBuf::default();
        let bytes = reader
            .read_record_buf(&self.header, &mut record)
            .map_err(|source| PorecallError::TempFileIo {
                path: self.temp_files[file_idx].clone(),
                source,
            })?;
        Ok(if bytes == 0 { None } else { Some(record) })
    }

    /// The output header: the shared temp header with `SO:coordinate`.
    fn create_output_header(&self) -> Header {
        let mut builder = Header::builder();
        for (name, reference_sequence) in self.header.reference_sequences() {
            builder = builder.add_reference_sequence(name.as_slice(), reference_sequence.clone());
        }
        for (id, read_group) in self.header.read_groups() {
            builder = builder.add_read_group(id.as_slice(), read_group.clone());
        }
        for (id, program) in self.header.programs().as_ref() {
            builder = builder.add_program(id.as_slice(), program.clone());
        }
        for comment in self.header.comments() {
            builder = builder.add_comment(comment.clone());
        }
        let hd = Map::<noodles::sam::header::record::value::map::Header>::builder()
            .insert(header_tag::SORT_ORDER, BString::from("coordinate"))
            .build()
            .expect("valid header");
        builder.set_header(hd).build()
    }
}

/// Canonical serialized form of a header, for byte comparison.
fn serialize_header(header: &Header) -> Result<Vec<u8>> {
    let mut writer = noodles::sam::io::Writer::new(Vec::new());
    writer.write_header(header)?;
    Ok(writer.into_inner())
}

struct MergeEntry {
    key: u64,
    file_idx: usize,
    record: RecordBuf,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.file_idx == other.file_idx
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key).then_with(|| self.file_idx.cmp(&other.file_idx))
    }
}
