//! Integration tests for the porecall library.
//!
//! These tests validate end-to-end behaviour that spans multiple modules:
//! full pipeline runs, sorted-BAM output, and the concurrency contracts.

mod helpers;
mod test_concurrency;
mod test_nodes;
mod test_pipeline_flow;
mod test_sorted_bam;
