//! Error types for snapshot store operations

use thiserror::Error;

/// Result type for snapshot store operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors that can occur while saving, loading, or listing snapshots
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// No snapshot exists for the given task id
    #[error("no snapshot for task: {0}")]
    NotFound(String),

    /// JSON encoding of a snapshot envelope failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary encoding of a per-node blob failed
    #[error("binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// The underlying store (disk, object storage, ...) failed
    #[error("storage error: {0}")]
    Storage(String),

    /// A snapshot was structurally invalid (e.g. a truncated blob)
    #[error("invalid snapshot: {0}")]
    Invalid(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
