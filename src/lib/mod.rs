#![deny(unsafe_code)]
// Clippy lint configuration for CI
// These lints are allowed because:
// - cast_*: Signal-processing code intentionally casts between numeric types
// - missing_*_doc: Documentation improvements tracked separately
// - needless_pass_by_value: Some APIs designed for ownership transfer
// - items_after_statements: Some test code uses late item declarations
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::needless_pass_by_value,
    clippy::items_after_statements,
    clippy::module_name_repetitions
)]

//! # porecall - Streaming Nanopore Read Pipeline
//!
//! porecall moves signal reads through a staged dataflow of processing
//! nodes and multiplexes the work across heterogeneous compute resources.
//!
//! ## Overview
//!
//! The library is organised into a few layers:
//!
//! ### Core
//!
//! - **[`pipeline`]** - the bounded node graph: scaler, basecaller,
//!   modified-base caller, polyA calculator, and the HTS writer
//! - **[`basecall`]** - runner/caller binding: devices, model backends,
//!   and the construction-time fan-out plan
//! - **[`concurrency`]** - work queues, the priority task queue, and the
//!   rendezvous task executor
//!
//! ### Data model
//!
//! - **[`read`]** - reads and call chunks
//! - **[`messages`]** - the message envelope and per-client context
//! - **[`correction`]** - cigar ops, overlaps, and correction windows
//!
//! ### Output
//!
//! - **[`hts`]** - the coordinate-sorting BAM sink and BAI indexing
//!
//! ### Utilities
//!
//! - **[`config`]** - the pipeline configuration record
//! - **[`errors`]** - domain error types
//! - **[`stats`]** - per-node statistics snapshots
//! - **[`logging`]** / **[`progress`]** - log formatting and progress
//! - **[`loader`]** - a development signal loader
//!
//! ## Quick Start
//!
//! ```no_run
//! use porecall_lib::basecall::{BackendFactory, CpuBackendFactory, ModelConfig};
//! use porecall_lib::config::BasecallerConfig;
//! use porecall_lib::pipeline::create_basecall_pipeline;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> porecall_lib::Result<()> {
//! let config = BasecallerConfig::default();
//! let factory: Arc<dyn BackendFactory> = Arc::new(CpuBackendFactory);
//! let model = ModelConfig::simple("example", 6);
//!
//! let pipeline =
//!     create_basecall_pipeline(&config, &factory, &model, Path::new("calls.bam"), false)?;
//! // ... push reads ...
//! pipeline.terminate();
//! pipeline.finalise_output(&|_percent| {})?;
//! # Ok(())
//! # }
//! ```

pub mod basecall;
pub mod concurrency;
pub mod config;
pub mod correction;
pub mod errors;
pub mod hts;
pub mod loader;
pub mod logging;
pub mod messages;
pub mod pipeline;
pub mod poly_tail;
pub mod progress;
pub mod read;
pub mod stats;

pub use errors::{PorecallError, Result};
pub use messages::Message;
pub use read::SimplexRead;
