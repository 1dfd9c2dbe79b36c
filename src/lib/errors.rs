//! Custom error types for porecall operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for porecall operations
pub type Result<T> = std::result::Result<T, PorecallError>;

/// Error type for porecall operations
#[derive(Error, Debug)]
pub enum PorecallError {
    /// A message was pushed to a terminated work queue
    #[error("Work queue is closed")]
    QueueClosed,

    /// Unknown device string in the runner plan
    #[error("Unsupported device: '{device}'")]
    UnsupportedDevice {
        /// The device string as given
        device: String,
    },

    /// A GPU device class was requested but enumeration found none
    #[error("Device enumeration failed for '{device}': {reason}")]
    DeviceEnumerationFailed {
        /// The device string as given
        device: String,
        /// Explanation of the failure
        reason: String,
    },

    /// Caller construction could not load the model
    #[error("Failed to load model '{model}': {reason}")]
    ModelLoadFailed {
        /// Model name or path
        model: String,
        /// Explanation from the inference layer
        reason: String,
    },

    /// A runner call failed; the read is skipped
    #[error("Inference failed for read '{read_id}': {reason}")]
    InferenceFailed {
        /// Read identifier
        read_id: String,
        /// Explanation from the inference layer
        reason: String,
    },

    /// Basecall decode produced inconsistent output for a read
    #[error("Malformed read '{read_id}': {reason}")]
    MalformedRead {
        /// Read identifier
        read_id: String,
        /// Explanation of the inconsistency
        reason: String,
    },

    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// I/O failure on a sorted-output temporary file
    #[error("Temporary file I/O failed for '{path}': {source}")]
    TempFileIo {
        /// Path of the temporary file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Temporary file headers differ during merge
    #[error("Header for temporary file '{path}' does not match other headers")]
    HeaderMismatch {
        /// Path of the mismatching temporary file
        path: PathBuf,
    },

    /// Final output could not be indexed
    #[error("Failed to build index for '{path}': {reason}")]
    IndexBuildFailed {
        /// Path of the output file
        path: PathBuf,
        /// Explanation of the failure
        reason: String,
    },

    /// General I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
