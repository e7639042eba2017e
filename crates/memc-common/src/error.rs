//! Error types for memc-load

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for memc-load operations
pub type Result<T> = std::result::Result<T, MemcError>;

/// Main error type for memc-load
#[derive(Error, Debug)]
pub enum MemcError {
    #[error("IO error on '{path}': {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid input pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

impl MemcError {
    /// Attach the offending path to an I/O error
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MemcError::File {
            path: path.into(),
            source,
        }
    }
}
