//! Error types for buffer loading and revival.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from buffer construction.
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Cannot load buffer for {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    #[error("File does not exist: {path}")]
    FileMissing { path: PathBuf },

    #[error("Failed to deserialize buffer {id}: {reason}")]
    DeserializeFailed { id: String, reason: String },
}
