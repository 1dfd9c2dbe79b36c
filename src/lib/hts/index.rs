//! BAI index construction for merged BAM output.
//!
//! The index is built by re-reading the finished file and feeding each
//! record's virtual-position chunk to a binning indexer.

use crate::errors::{PorecallError, Result};
use noodles::bam;
use noodles::csi::binning_index::Indexer;
use noodles::csi::binning_index::index::reference_sequence::bin::Chunk;
use noodles::csi::binning_index::index::reference_sequence::index::LinearIndex;
use noodles::sam::alignment::record_buf::RecordBuf;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Build a BAI index beside `path`, returning the index path.
///
/// # Errors
///
/// Returns `IndexBuildFailed` when the file cannot be read or the index
/// cannot be written.
pub fn build_bai_index(path: &Path) -> Result<PathBuf> {
    build(path).map_err(|e| PorecallError::IndexBuildFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn build(path: &Path) -> std::io::Result<PathBuf> {
    let file = File::open(path)?;
    let mut reader = bam::io::Reader::new(file);
    let header = reader.read_header()?;
    let num_refs = header.reference_sequences().len();

    let mut indexer: Indexer<LinearIndex> = Indexer::default();
    let mut record = RecordBuf::default();

    loop {
        let start = reader.get_ref().virtual_position();
        if reader.read_record_buf(&header, &mut record)? == 0 {
            break;
        }
        let end = reader.get_ref().virtual_position();
        let chunk = Chunk::new(start, end);

        let is_mapped = !record.flags().is_unmapped();
        let context = match (record.reference_sequence_id(), record.alignment_start()) {
            (Some(reference_sequence_id), Some(alignment_start)) if is_mapped => {
                // Records without a cigar (or with a degenerate one) span a
                // single base.
                let alignment_end = record
                    .alignment_end()
                    .filter(|end| *end >= alignment_start)
                    .unwrap_or(alignment_start);
                Some((reference_sequence_id, alignment_start, alignment_end, is_mapped))
            }
            _ => None,
        };

        indexer.add_record(context, chunk).map_err(std::io::Error::other)?;
    }

    let index = indexer.build(num_refs);
    let index_path = PathBuf::from(format!("{}.bai", path.display()));
    let index_file = File::create(&index_path)?;
    let mut writer = bam::bai::io::Writer::new(index_file);
    writer.write_index(&index)?;
    Ok(index_path)
}
