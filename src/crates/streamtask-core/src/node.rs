//! Node lifecycle: `Created → Running → Stopping → Stopped`, plus the
//! orthogonal `Aborting` flag (§3, §5).
//!
//! A node is a spawned fiber running an operator's consumer loop over its
//! `ins` and producing to its `outs`. This module owns the lifecycle
//! bookkeeping; the operator set in [`crate::ops`] owns the loop bodies.

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::{EngineError, Result};
use crate::stats::Counter;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl NodeState {
    fn from_code(code: u8) -> Self {
        match code {
            0 => NodeState::Created,
            1 => NodeState::Running,
            2 => NodeState::Stopping,
            _ => NodeState::Stopped,
        }
    }

    fn code(self) -> u8 {
        match self {
            NodeState::Created => 0,
            NodeState::Running => 1,
            NodeState::Stopping => 2,
            NodeState::Stopped => 3,
        }
    }
}

/// The orthogonal abort flag shared between a node's handle and the
/// running operator. Raising it is irreversible and wakes anything
/// waiting on it, mirroring [`crate::edge`]'s abort notification.
#[derive(Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortSignal {
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolve once `raise()` has been called (immediately if it already
    /// has). Operators `tokio::select!` this alongside their edge waits.
    pub async fn wait(&self) {
        if self.is_set() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Per-node counters (§2 "Stats / expvars", §4.2's exec-time note).
#[derive(Default)]
pub struct NodeStats {
    /// Accumulated nanoseconds of non-blocked execution time. Operators
    /// pause accounting while awaiting a blocked `Collect`/`Next`.
    pub exec_time_ns: AtomicU64,
    pub errors: Counter,
}

impl NodeStats {
    pub fn add_exec_time(&self, d: std::time::Duration) {
        self.exec_time_ns.fetch_add(d.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn exec_time(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.exec_time_ns.load(Ordering::Relaxed))
    }
}

/// Bundles an operator's wiring: its parent/child edges, the abort
/// signal, and its stats, threaded through `ops::*::run`.
pub struct NodeContext {
    pub name: String,
    pub ins: Vec<EdgeReceiver>,
    pub outs: Vec<EdgeSender>,
    pub abort: AbortSignal,
    pub stats: Arc<NodeStats>,
}

impl NodeContext {
    /// Close every out-edge. Invariant: a node must close all `outs` on
    /// return, normal or not (§3).
    pub fn close_outs(&self) {
        for out in &self.outs {
            out.close();
        }
    }

    /// Drain any remaining messages on `ins`, discarding them. Invariant:
    /// a node must drain all `ins` before returning normally (§3).
    pub async fn drain_ins(&mut self) {
        for inp in &mut self.ins {
            while inp.next().await.is_some() {}
        }
    }

    pub fn record_error(&self, err: &EngineError) {
        self.stats.errors.incr();
        tracing::warn!(node = %self.name, error = %err, "node data error");
    }
}

/// A spawned node: owns the join handle and exposes lifecycle control.
pub struct NodeHandle {
    name: String,
    state: Arc<AtomicU8>,
    abort: AbortSignal,
    stats: Arc<NodeStats>,
    join: Mutex<Option<JoinHandle<Result<()>>>>,
    on_stop: Option<Box<dyn Fn() + Send + Sync>>,
}

/// A node ready to run but not yet spawned. Built by an `ops::*`
/// constructor, handed to [`spawn`].
pub struct Node<Make> {
    pub name: String,
    pub ins: Vec<EdgeReceiver>,
    pub outs: Vec<EdgeSender>,
    pub make_run: Make,
    pub on_stop: Option<Box<dyn Fn() + Send + Sync>>,
}

/// Spawn a node's run future, wiring up lifecycle state and returning a
/// handle. `node.make_run` receives the assembled [`NodeContext`] and
/// produces the operator's future.
pub fn spawn<Fut, Make>(node: Node<Make>) -> NodeHandle
where
    Make: FnOnce(NodeContext) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let Node { name, ins, outs, make_run, on_stop } = node;
    let state = Arc::new(AtomicU8::new(NodeState::Created.code()));
    let abort = AbortSignal::default();
    let stats = Arc::new(NodeStats::default());

    let ctx = NodeContext {
        name: name.clone(),
        ins,
        outs,
        abort: abort.clone(),
        stats: stats.clone(),
    };

    state.store(NodeState::Running.code(), Ordering::Release);
    let state_for_task = state.clone();
    let node_name = name.clone();
    let fut = make_run(ctx);
    let join = tokio::spawn(async move {
        let result = fut.await;
        state_for_task.store(NodeState::Stopped.code(), Ordering::Release);
        if let Err(err) = &result {
            if err.is_fatal() {
                tracing::error!(node = %node_name, error = %err, "node exited with fatal error");
            }
        }
        result
    });

    NodeHandle {
        name,
        state,
        abort,
        stats,
        join: Mutex::new(Some(join)),
        on_stop,
    }
}

impl NodeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_code(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> &Arc<NodeStats> {
        &self.stats
    }

    /// Request a graceful stop. Idempotent; a no-op once already stopping
    /// or stopped. Relies on the operator observing upstream edge closure
    /// (or its own `on_stop` hook) to actually unwind.
    pub fn stop(&self) {
        let _ = self.state.compare_exchange(
            NodeState::Running.code(),
            NodeState::Stopping.code(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if let Some(cb) = &self.on_stop {
            cb();
        }
    }

    /// Raise the orthogonal abort flag. Irreversible; always safe to call
    /// more than once.
    pub fn abort(&self) {
        self.abort.raise();
        let _ = self.state.compare_exchange(
            NodeState::Running.code(),
            NodeState::Stopping.code(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Wait for the node's run future to complete, consuming the handle's
    /// join slot. Calling this more than once returns the cached final
    /// state with no error.
    pub async fn join(&self) -> Result<()> {
        let mut guard = self.join.lock().await;
        match guard.take() {
            Some(handle) => handle
                .await
                .unwrap_or_else(|e| Err(EngineError::fatal(self.name.clone(), e.to_string()))),
            None => Ok(()),
        }
    }
}
