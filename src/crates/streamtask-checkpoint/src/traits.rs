//! The [`SnapshotStore`] trait — the task-store collaborator the engine
//! asks to persist and recall a task's state.
//!
//! A snapshot is an opaque, ordered map from node identifier to the bytes
//! that node's [`crate::serializer::SerializerProtocol`] produced. The
//! engine does not prescribe what lives in the map on disk: a store could
//! back it with a single file, a row per task in a database, or an
//! in-memory map for tests, which is what [`crate::memory::InMemorySnapshotStore`]
//! does.
//!
//! The trait is deliberately narrow: `HasSnapshot`/`LoadSnapshot`/
//! `SaveSnapshot` — no thread/version/write bookkeeping, since this engine
//! checkpoints one task at a time rather than time-traveling through a
//! superstep history.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An ordered map from node id to that node's opaque serialized state.
///
/// `BTreeMap` gives deterministic iteration order, which matters when the
/// whole snapshot is itself hashed or diffed for change detection.
pub type Snapshot = BTreeMap<String, Vec<u8>>;

/// Persists and recalls a [`Snapshot`] per task.
///
/// Implementations MUST treat `save_snapshot` as a full replacement of any
/// prior snapshot for the same task id (not a merge) — an operator that
/// dropped a key on this tick (e.g. after a `DeleteGroup`) must see that
/// key gone on the next `load_snapshot`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// True if a snapshot exists for `task_id`.
    async fn has_snapshot(&self, task_id: &str) -> Result<bool>;

    /// Load the snapshot for `task_id`, if any.
    async fn load_snapshot(&self, task_id: &str) -> Result<Option<Snapshot>>;

    /// Replace the snapshot for `task_id`.
    async fn save_snapshot(&self, task_id: &str, snapshot: Snapshot) -> Result<()>;

    /// Remove any snapshot for `task_id`. Called on task deletion.
    async fn delete_snapshot(&self, task_id: &str) -> Result<()>;
}

/// Convenience envelope for stores that persist the whole snapshot as a
/// single blob (a file, a database column, ...) rather than per-node rows.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotEnvelope {
    pub task_id: String,
    pub nodes: Snapshot,
}
