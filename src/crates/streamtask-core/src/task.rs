//! `Task`, `Template`, and `ExecutingTask` (§3, §4.9's "Task /
//! ExecutingTask" row): translating a compiled pipeline into a wired node
//! graph and owning its running fiber group.
//!
//! The pipeline DSL's lexer/parser is out of scope; this module accepts
//! whatever a compiler upstream produces as a [`PipelineSpec`] — a flat
//! list of [`NodeSpec`]s naming their parents by id, each carrying a
//! factory closure that builds its `NodeHandle` once its edges exist.
//! Construction (assembling a `PipelineSpec`) and execution (wiring and
//! running it) are deliberately separate: a pipeline can be validated and
//! inspected before a single node is spawned.

use crate::edge::{self, EdgeConfig, EdgeKind, EdgeReceiver, EdgeSender};
use crate::error::{EngineError, Result};
use crate::node::NodeHandle;
use chrono::Duration;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Stream,
    Batch,
}

/// Builds a node's `NodeHandle` once its `ins`/`outs` edges exist. Takes
/// this node's snapshot blob, if a prior run left one and a store had
/// one to hand back.
pub type NodeFactory = Box<dyn FnOnce(Vec<EdgeReceiver>, Vec<EdgeSender>, Option<Vec<u8>>) -> NodeHandle + Send>;

/// Produces this node's current state as an opaque blob for a snapshot.
/// Stateless operators simply never register one.
pub type SnapshotProducer = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

/// One node in a compiled pipeline: its id, the ids of the nodes feeding
/// it (in the order their edges should be wired into `ins`), the edge
/// kind and buffering this node's own outputs use, and the factory that
/// builds it.
pub struct NodeSpec {
    pub id: String,
    pub parents: Vec<String>,
    pub out_edge_kind: EdgeKind,
    pub out_edge_config: EdgeConfig,
    pub factory: NodeFactory,
    pub snapshot: Option<SnapshotProducer>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, parents: Vec<String>, out_edge_kind: EdgeKind, factory: NodeFactory) -> Self {
        Self { id: id.into(), parents, out_edge_kind, out_edge_config: EdgeConfig::default(), factory, snapshot: None }
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotProducer) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// A compiled pipeline: a flat list of nodes, parents referenced by id.
#[derive(Default)]
pub struct PipelineSpec {
    pub nodes: Vec<NodeSpec>,
}

impl PipelineSpec {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        Self { nodes }
    }

    fn validate(&self, external_inputs: &[String]) -> Result<()> {
        let ids: std::collections::HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        if ids.len() != self.nodes.len() {
            return Err(EngineError::Config("pipeline has duplicate node ids".into()));
        }
        for node in &self.nodes {
            for parent in &node.parents {
                if !ids.contains(parent.as_str()) {
                    return Err(EngineError::Config(format!("node '{}' references unknown parent '{}'", node.id, parent)));
                }
            }
        }
        for input in external_inputs {
            if !ids.contains(input.as_str()) {
                return Err(EngineError::Config(format!("unknown external-input node '{}'", input)));
            }
        }
        Ok(())
    }
}

/// A `Task` with free variables still to bind. A compiler produces a
/// `Template` once for a parameterized pipeline definition; binding
/// yields a concrete `Task` per invocation.
pub struct Template {
    pub id: String,
    pub kind: TaskKind,
    /// `(database, retention_policy, measurement)`; an empty
    /// measurement subscribes to every measurement in that (db, rp).
    pub subscriptions: Vec<(String, String, String)>,
    pub pipeline: PipelineSpec,
    pub snapshot_interval: Option<Duration>,
    pub free_vars: Vec<String>,
    /// Root node ids that receive one externally supplied receiver per
    /// subscription, in subscription order (stream tasks only).
    pub external_inputs: Vec<String>,
}

impl Template {
    pub fn bind(self, vars: BTreeMap<String, String>) -> Result<Task> {
        for var in &self.free_vars {
            if !vars.contains_key(var) {
                return Err(EngineError::Config(format!("template '{}' missing binding for '{}'", self.id, var)));
            }
        }
        Ok(Task {
            id: self.id,
            kind: self.kind,
            subscriptions: self.subscriptions,
            pipeline: self.pipeline,
            snapshot_interval: self.snapshot_interval,
            bound_vars: vars,
            external_inputs: self.external_inputs,
        })
    }
}

/// Identifier, type, subscriptions, compiled pipeline, snapshot interval,
/// and bound variables (§3).
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    /// `(database, retention_policy, measurement)`; an empty
    /// measurement subscribes to every measurement in that (db, rp).
    pub subscriptions: Vec<(String, String, String)>,
    pub pipeline: PipelineSpec,
    pub snapshot_interval: Option<Duration>,
    pub bound_vars: BTreeMap<String, String>,
    pub external_inputs: Vec<String>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("subscriptions", &self.subscriptions)
            .field("snapshot_interval", &self.snapshot_interval)
            .field("bound_vars", &self.bound_vars)
            .field("external_inputs", &self.external_inputs)
            .finish_non_exhaustive()
    }
}

/// A `Task` whose pipeline has been materialized into running nodes.
/// Start is atomic: [`ExecutingTask::start`] validates the whole pipeline
/// before wiring a single edge or spawning a single node, so a rejected
/// task leaves nothing behind.
pub struct ExecutingTask {
    id: String,
    handles: HashMap<String, NodeHandle>,
    snapshot_producers: HashMap<String, SnapshotProducer>,
    /// Root nodes with no upstream edge of their own (batch `Query`
    /// nodes); `stop`/`abort` must signal these directly since no edge
    /// closure will ever reach them.
    generator_nodes: Vec<String>,
}

impl std::fmt::Debug for ExecutingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutingTask")
            .field("id", &self.id)
            .field("generator_nodes", &self.generator_nodes)
            .finish_non_exhaustive()
    }
}

impl ExecutingTask {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Materialize `task.pipeline` into a running node graph.
    /// `external_ins` supplies one receiver per entry in
    /// `task.external_inputs`, in order (the per-(db,rp) source edges a
    /// `TaskMaster` allocates for a stream task; empty for a batch task).
    /// `restored` is this task's snapshot from a prior run, if any.
    pub fn start(task: Task, external_ins: Vec<EdgeReceiver>, restored: Option<streamtask_checkpoint::Snapshot>) -> Result<ExecutingTask> {
        task.pipeline.validate(&task.external_inputs)?;
        if external_ins.len() != task.external_inputs.len() {
            return Err(EngineError::Config(format!(
                "task '{}' expects {} external input edge(s), got {}",
                task.id,
                task.external_inputs.len(),
                external_ins.len()
            )));
        }

        let mut pending: HashMap<String, (Vec<EdgeReceiver>, Vec<EdgeSender>)> =
            task.pipeline.nodes.iter().map(|n| (n.id.clone(), (Vec::new(), Vec::new()))).collect();

        for (input_id, receiver) in task.external_inputs.iter().zip(external_ins) {
            pending.get_mut(input_id).unwrap().0.push(receiver);
        }

        for node in &task.pipeline.nodes {
            for parent_id in &node.parents {
                let (parent_out_kind, parent_out_config) = task
                    .pipeline
                    .nodes
                    .iter()
                    .find(|n| &n.id == parent_id)
                    .map(|n| (n.out_edge_kind, n.out_edge_config))
                    .expect("validated above");
                let (sender, receiver) = edge::channel(parent_out_kind, parent_out_config);
                pending.get_mut(parent_id).unwrap().1.push(sender);
                pending.get_mut(&node.id).unwrap().0.push(receiver);
            }
        }

        let mut handles = HashMap::with_capacity(task.pipeline.nodes.len());
        let mut snapshot_producers = HashMap::new();
        let mut generator_nodes = Vec::new();
        for node in task.pipeline.nodes {
            let (ins, outs) = pending.remove(&node.id).unwrap();
            let blob = restored.as_ref().and_then(|s| s.get(&node.id).cloned());
            if node.parents.is_empty() && !task.external_inputs.contains(&node.id) {
                generator_nodes.push(node.id.clone());
            }
            if let Some(producer) = node.snapshot {
                snapshot_producers.insert(node.id.clone(), producer);
            }
            let handle = (node.factory)(ins, outs, blob);
            handles.insert(node.id, handle);
        }

        Ok(ExecutingTask { id: task.id, handles, snapshot_producers, generator_nodes })
    }

    /// Request a graceful stop. For most nodes this is a no-op beyond
    /// marking `Stopping`: the caller (typically a `TaskMaster`) closes
    /// whatever upstream edge feeds this task's root nodes, and closure
    /// cascades through the graph. Generator nodes have no upstream edge
    /// to close, so they are aborted directly.
    pub fn stop(&self) {
        for handle in self.handles.values() {
            handle.stop();
        }
        for id in &self.generator_nodes {
            if let Some(handle) = self.handles.get(id) {
                handle.abort();
            }
        }
    }

    /// Fail-fast: abort every node immediately.
    pub fn abort(&self) {
        for handle in self.handles.values() {
            handle.abort();
        }
    }

    /// Wait for every node's fiber to finish, returning the first error
    /// observed (if any), consistent with "a node must close all outs on
    /// return" propagating up to the task boundary.
    pub async fn join(&self) -> Result<()> {
        let mut first_err = None;
        for handle in self.handles.values() {
            if let Err(e) = handle.join().await {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Gather every stateful node's current blob into a snapshot. Nodes
    /// with no registered producer are omitted, not written as empty.
    pub fn snapshot(&self) -> streamtask_checkpoint::Snapshot {
        self.snapshot_producers.iter().map(|(id, producer)| (id.clone(), producer())).collect()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(|s| s.as_str())
    }
}
