//! Error types for blocksort
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using SortError
pub type Result<T> = std::result::Result<T, SortError>;

/// Unified error type for blocksort operations
#[derive(Debug, Error)]
pub enum SortError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Integrity Errors (always fatal)
    // -------------------------------------------------------------------------
    #[error("Block key mismatch: expected {expected}, found {found}")]
    KeyMismatch { expected: i64, found: i64 },

    #[error("Corrupt block in {path:?} at offset {offset}: {reason}")]
    Corruption {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("Write for key {key} after the store entered its read phase")]
    WriteAfterRead { key: i64 },

    #[error("Decode error: {0}")]
    Decode(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Block store already finished")]
    StoreClosed,

    #[error("Output error: {0}")]
    Output(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown store mode: {0:?}")]
    UnknownStoreMode(String),
}

impl SortError {
    /// True for errors that indicate corrupted state or a misuse of the
    /// write-then-read protocol. Callers must not continue after these.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            SortError::KeyMismatch { .. }
                | SortError::Corruption { .. }
                | SortError::WriteAfterRead { .. }
                | SortError::Decode(_)
        )
    }
}
