//! HTS output: the coordinate-sorting BAM sink and index construction.

pub mod index;
pub mod sorted_sink;

pub use index::build_bai_index;
pub use sorted_sink::{SortedBamSink, calculate_sorting_key};
