//! In-memory [`SnapshotStore`] for development and tests.
//!
//! Ephemeral, thread-safe, no external dependencies — the reference
//! implementation every `TaskMaster` test in `streamtask-core` is built
//! against. A production deployment plugs in its own store (a row per task
//! in whatever database backs task definitions); that store is this
//! engine's external collaborator, not something this crate prescribes.

use crate::error::Result;
use crate::traits::{Snapshot, SnapshotStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Thread-safe in-memory snapshot store keyed by task id.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self { snapshots: RwLock::new(HashMap::new()) }
    }

    /// Drop every stored snapshot. Test isolation helper.
    pub async fn clear(&self) {
        self.snapshots.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn has_snapshot(&self, task_id: &str) -> Result<bool> {
        Ok(self.snapshots.read().await.contains_key(task_id))
    }

    async fn load_snapshot(&self, task_id: &str) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().await.get(task_id).cloned())
    }

    async fn save_snapshot(&self, task_id: &str, snapshot: Snapshot) -> Result<()> {
        self.snapshots.write().await.insert(task_id.to_string(), snapshot);
        Ok(())
    }

    async fn delete_snapshot(&self, task_id: &str) -> Result<()> {
        self.snapshots.write().await.remove(task_id);
        Ok(())
    }
}
