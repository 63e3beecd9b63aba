//! Error types for task construction and execution, per §7.
//!
//! `EngineError` distinguishes errors that refuse a task start
//! ([`EngineError::Config`]) from errors that occur during data flow. Most
//! data-flow errors are not fatal: [`EngineError::Data`] is logged and
//! counted by the node that produced it and the offending message is
//! dropped, never propagated. Only [`EngineError::Fatal`],
//! [`EngineError::EdgeAborted`], and an unacknowledged
//! [`EngineError::EdgeClosed`] bring a task down.

use thiserror::Error;

/// Convenience result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// The error hierarchy described in spec §7.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Bad pipeline definition, bad options, or a bad cron expression.
    /// Refuses task start; never arises during data flow.
    #[error("configuration error: {0}")]
    Config(String),

    /// Type mismatch in an evaluated lambda, unknown reference variable, or
    /// a field/tag name collision. Increments a per-node error counter,
    /// is logged, and drops the offending point. Never kills the task.
    #[error("data error in node '{node}': {error}")]
    Data { node: String, error: String },

    /// The edge was closed by its producer; propagates upward as a clean
    /// shutdown.
    #[error("edge closed")]
    EdgeClosed,

    /// The edge was aborted; propagates upward as an abort.
    #[error("edge aborted")]
    EdgeAborted,

    /// The UDF peer process exited. Not an error if the node itself
    /// initiated the stop.
    #[error("udf server stopped")]
    UdfServerStopped,

    /// The node was aborted. Not an error if the node itself initiated the
    /// abort (e.g. in response to `Task::abort`).
    #[error("node aborted: {0}")]
    NodeAborted(String),

    /// A batch query failed. Counted and logged; the next scheduled tick
    /// retries — there is no independent retry path.
    #[error("query error: {0}")]
    Query(String),

    /// An external collaborator (scaler, point writer, UDF peer) failed.
    /// Counted and logged; retry policy is operator-specific.
    #[error("external error ({resource}): {error}")]
    External { resource: String, error: String },

    /// Unrecoverable: aborts the owning task. Other tasks are unaffected.
    #[error("fatal error in task '{task}': {error}")]
    Fatal { task: String, error: String },

    #[error("snapshot error: {0}")]
    Snapshot(#[from] streamtask_checkpoint::SnapshotError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("cron expression error: {0}")]
    Cron(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn data(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Data { node: node.into(), error: error.into() }
    }

    pub fn external(resource: impl Into<String>, error: impl Into<String>) -> Self {
        Self::External { resource: resource.into(), error: error.into() }
    }

    pub fn fatal(task: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Fatal { task: task.into(), error: error.into() }
    }

    /// True for errors that should end the owning task outright, as
    /// opposed to being logged/counted and otherwise ignored.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::EdgeAborted | Self::UdfServerStopped)
    }
}
