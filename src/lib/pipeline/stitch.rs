//! Deterministic stitching of overlapping chunk calls.
//!
//! A read's chunks overlap their neighbours; within each overlap the
//! stitched output prefers the chunk whose centre is closer to the sample,
//! with ties broken toward the lower chunk index. For a fixed input, chunk
//! geometry, and model state the result is bit-identical regardless of how
//! chunks were batched or which threads called them.

use crate::errors::{PorecallError, Result};
use crate::read::CallChunk;

/// The stitched output of a read.
#[derive(Debug, PartialEq, Eq)]
pub struct Stitched {
    /// Full-read sequence.
    pub seq: Vec<u8>,
    /// Full-read quality string.
    pub qstring: Vec<u8>,
    /// Full-read moves vector, one entry per model step.
    pub moves: Vec<u8>,
}

/// Merge called chunks into a single sequence, quality string, and moves
/// vector.
///
/// Chunks must be sorted by index, with stride-aligned offsets and sizes.
/// The centre-distance rule reduces to splitting each overlap at its
/// midpoint: the earlier chunk keeps the first `ceil(overlap / 2)` steps,
/// the later chunk the rest.
///
/// # Errors
///
/// Returns `MalformedRead` when a chunk's calls are internally
/// inconsistent or the chunk geometry is not stride aligned.
pub fn stitch_chunks(read_id: &str, chunks: &[CallChunk], stride: usize) -> Result<Stitched> {
    if chunks.is_empty() {
        return Err(malformed(read_id, "no called chunks to stitch"));
    }

    for chunk in chunks {
        validate_chunk(read_id, chunk, stride)?;
    }

    let mut seq = Vec::new();
    let mut qstring = Vec::new();
    let mut moves = Vec::new();

    for (i, chunk) in chunks.iter().enumerate() {
        let num_steps = chunk.raw_chunk_size / stride;

        // Steps of this chunk dropped in favour of its neighbours.
        let leading_skip = if i == 0 {
            0
        } else {
            let prev = &chunks[i - 1];
            let overlap_steps = overlap_steps(read_id, prev, chunk, stride)?;
            overlap_steps.div_ceil(2)
        };
        let trailing_cut = if i + 1 == chunks.len() {
            0
        } else {
            let next = &chunks[i + 1];
            let overlap_steps = overlap_steps(read_id, chunk, next, stride)?;
            overlap_steps / 2
        };

        if leading_skip + trailing_cut > num_steps {
            return Err(malformed(read_id, "chunk overlap exceeds chunk size"));
        }

        // Bases are indexed by the cumulative move count within the chunk.
        let mut base_idx = 0usize;
        for (step, &movement) in chunk.moves.iter().enumerate() {
            let kept = step >= leading_skip && step < num_steps - trailing_cut;
            if kept {
                moves.push(movement);
            }
            if movement == 1 {
                if kept {
                    seq.push(chunk.seq[base_idx]);
                    qstring.push(chunk.qstring[base_idx]);
                }
                base_idx += 1;
            }
        }
    }

    if seq.is_empty() {
        return Err(malformed(read_id, "stitched sequence is empty"));
    }

    Ok(Stitched { seq, qstring, moves })
}

fn overlap_steps(
    read_id: &str,
    earlier: &CallChunk,
    later: &CallChunk,
    stride: usize,
) -> Result<usize> {
    let earlier_end = earlier.input_offset + earlier.raw_chunk_size;
    if later.input_offset > earlier_end {
        return Err(malformed(read_id, "gap between adjacent chunks"));
    }
    Ok((earlier_end - later.input_offset) / stride)
}

fn validate_chunk(read_id: &str, chunk: &CallChunk, stride: usize) -> Result<()> {
    if stride == 0 || chunk.raw_chunk_size % stride != 0 || chunk.input_offset % stride != 0 {
        return Err(malformed(read_id, "chunk geometry is not stride aligned"));
    }
    let num_steps = chunk.raw_chunk_size / stride;
    if chunk.moves.len() != num_steps {
        return Err(malformed(read_id, "moves length does not match chunk steps"));
    }
    let num_bases: usize = chunk.moves.iter().map(|&m| usize::from(m)).sum();
    if chunk.seq.len() != num_bases || chunk.qstring.len() != num_bases {
        return Err(malformed(read_id, "called bases do not match moves"));
    }
    Ok(())
}

fn malformed(read_id: &str, reason: &str) -> PorecallError {
    PorecallError::MalformedRead { read_id: read_id.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a chunk whose every step emits a base from `bases`.
    fn chunk_all_moves(idx: usize, offset: usize, stride: usize, bases: &[u8]) -> CallChunk {
        let mut chunk = CallChunk::new(idx, offset, bases.len() * stride);
        chunk.seq = bases.to_vec();
        chunk.qstring = vec![b'5'; bases.len()];
        chunk.moves = vec![1; bases.len()];
        chunk
    }

    #[test]
    fn test_single_chunk_passthrough() {
        let chunk = chunk_all_moves(0, 0, 5, b"ACGT");
        let stitched = stitch_chunks("r", &[chunk], 5).unwrap();
        assert_eq!(stitched.seq, b"ACGT");
        assert_eq!(stitched.moves, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_even_overlap_split() {
        // Two chunks of 6 steps each, overlapping by 4 steps: the earlier
        // chunk keeps 2 overlap steps, the later chunk the other 2.
        let a = chunk_all_moves(0, 0, 5, b"AAAAAA");
        let b = chunk_all_moves(1, 10, 5, b"CCCCCC");
        let stitched = stitch_chunks("r", &[a, b], 5).unwrap();
        assert_eq!(stitched.seq, b"AAAACCCC");
        assert_eq!(stitched.moves.len(), 8);
    }

    #[test]
    fn test_odd_overlap_prefers_lower_index() {
        // Overlap of 3 steps: the earlier chunk keeps ceil(3/2) = 2 of
        // them, the later chunk only 1.
        let a = chunk_all_moves(0, 0, 5, b"AAAAA");
        let b = chunk_all_moves(1, 10, 5, b"CCCCC");
        let stitched = stitch_chunks("r", &[a, b], 5).unwrap();
        assert_eq!(stitched.seq, b"AAAACCC");
        assert_eq!(stitched.moves.len(), 7);
    }

    #[test]
    fn test_three_chunks() {
        let a = chunk_all_moves(0, 0, 2, b"AAAA");
        let b = chunk_all_moves(1, 4, 2, b"CCCC");
        let c = chunk_all_moves(2, 8, 2, b"GGGG");
        // Overlap of 2 steps at each joint, split 1/1.
        let stitched = stitch_chunks("r", &[a, b, c], 2).unwrap();
        assert_eq!(stitched.seq, b"AAACCGGG");
        assert_eq!(stitched.moves.len(), 8);
    }

    #[test]
    fn test_moves_with_stays() {
        // Chunk with stay steps: moves [1,0,1,0], 2 bases over 4 steps.
        let mut a = CallChunk::new(0, 0, 20);
        a.seq = b"AC".to_vec();
        a.qstring = b"55".to_vec();
        a.moves = vec![1, 0, 1, 0];
        let stitched = stitch_chunks("r", &[a], 5).unwrap();
        assert_eq!(stitched.seq, b"AC");
        assert_eq!(stitched.moves, vec![1, 0, 1, 0]);
    }

    #[test]
    fn test_gap_between_chunks_is_malformed() {
        let a = chunk_all_moves(0, 0, 5, b"AA");
        let b = chunk_all_moves(1, 100, 5, b"CC");
        assert!(stitch_chunks("r", &[a, b], 5).is_err());
    }

    #[test]
    fn test_inconsistent_chunk_is_malformed() {
        let mut a = chunk_all_moves(0, 0, 5, b"AAAA");
        a.seq.pop();
        assert!(stitch_chunks("r", &[a], 5).is_err());
    }

    #[test]
    fn test_deterministic_for_same_input() {
        let make = || {
            vec![
                chunk_all_moves(0, 0, 5, b"ACGTAC"),
                chunk_all_moves(1, 10, 5, b"GTACGT"),
                chunk_all_moves(2, 20, 5, b"ACGTAC"),
            ]
        };
        let first = stitch_chunks("r", &make(), 5).unwrap();
        let second = stitch_chunks("r", &make(), 5).unwrap();
        assert_eq!(first, second);
    }
}
