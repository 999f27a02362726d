//! Error types for root set management.

use thiserror::Error;

/// Errors from root addition and replacement.
#[derive(Error, Debug)]
pub enum ProjectError {
    /// The requested root path does not exist on disk.
    #[error("Path does not exist: {path}")]
    MissingPath { path: String },

    /// One or more roots in a replace-all were missing. The valid paths
    /// have already been applied; this is deliberate partial success.
    #[error("Paths do not exist: {}", paths.join(", "))]
    MissingPaths { paths: Vec<String> },
}
