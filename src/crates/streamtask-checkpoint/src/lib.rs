//! # streamtask-checkpoint — snapshot persistence for streamtask
//!
//! This crate defines the narrow collaborator interface the execution
//! engine in `streamtask-core` uses to persist and recall task state: an
//! opaque, ordered map from node id to bytes (a [`Snapshot`]), saved and
//! loaded atomically per task id.
//!
//! It intentionally does not prescribe an on-disk layout — that's the job
//! of whatever task-definition store a deployment already has. What it
//! provides is:
//!
//! - [`SnapshotStore`] — the trait the engine calls against
//! - [`InMemorySnapshotStore`] — a reference implementation used
//!   throughout `streamtask-core`'s own tests
//! - [`SerializerProtocol`] — the byte-encoding used for each node's blob
//!   before it goes into the map (JSON or bincode)
//!
//! ## Quick start
//!
//! ```rust
//! use streamtask_checkpoint::{InMemorySnapshotStore, SnapshotStore, Snapshot};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = InMemorySnapshotStore::new();
//! let mut snap = Snapshot::new();
//! snap.insert("join1".to_string(), b"state-bytes".to_vec());
//! store.save_snapshot("task-42", snap).await.unwrap();
//! assert!(store.has_snapshot("task-42").await.unwrap());
//! # }
//! ```

pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use error::{Result, SnapshotError};
pub use memory::InMemorySnapshotStore;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::{Snapshot, SnapshotEnvelope, SnapshotStore};
