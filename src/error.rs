//! Crate-level error type.
//!
//! Every fallible public operation returns [`EngineError`]. Validation,
//! conflict, and capacity errors are raised before any mutation occurs;
//! persistence errors distinguish plain I/O failures from corrupt or
//! incompatible snapshots.

use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the retrieval engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An embedding's length does not match the configured dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A document id was empty.
    #[error("document id must not be empty")]
    EmptyDocumentId,

    /// A document with this id already exists.
    #[error("document '{0}' already exists")]
    DuplicateDocument(String),

    /// The index has reached its configured element limit.
    #[error("index is full: max_elements = {max_elements}")]
    CapacityExhausted { max_elements: usize },

    /// No document with this id exists.
    #[error("document '{0}' not found")]
    DocumentNotFound(String),

    /// Parallel arrays passed to a batch operation have inconsistent lengths.
    #[error("batch length mismatch for {what}: expected {expected}, got {actual}")]
    BatchLengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A configuration or call parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A save/load was requested but no index path is configured.
    #[error("persistence is disabled: no index path configured")]
    PersistenceDisabled,

    /// An I/O failure while reading or writing a snapshot.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    /// A snapshot failed integrity checks (magic, CRC, truncation, bounds).
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),

    /// A snapshot is well-formed but incompatible with this configuration.
    #[error("incompatible snapshot: {0}")]
    SnapshotMismatch(String),

    /// A backing store for a fusion source is unavailable. The coordinator
    /// treats this as fatal for the vector source and as an empty
    /// contribution for the others.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Corrupt(e.to_string())
    }
}
