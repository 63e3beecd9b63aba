//! # streamtask-core — the task-graph execution engine
//!
//! `streamtask-core` is the runtime at the heart of a time-series stream
//! and batch processing system. A pipeline is authored elsewhere (a
//! domain-specific language this crate does not parse) as a directed
//! acyclic graph of operator nodes; this crate materializes that graph
//! into a wired set of [`node::Node`]s connected by [`edge`] channels, routes
//! ingested points or scheduled query results through it, and produces
//! alerts, derived streams, or writes to external storage.
//!
//! ## Module map
//!
//! - [`model`] — the value types: [`model::point::Point`],
//!   [`model::batch::Batch`], [`model::group::GroupId`], and the
//!   [`model::message::Message`] sum type carried on every edge.
//! - [`edge`] — a typed, bounded, ordered channel between two nodes.
//! - [`node`] — node lifecycle (`Created → Running → Stopping → Stopped`,
//!   with an orthogonal `Aborting` flag) and per-node stats.
//! - [`eval`] — the stateful lambda expression evaluator used by `Eval`,
//!   `StreamFrom`'s predicate, `Combine`, `Join`, and autoscale nodes.
//! - [`ops`] — the concrete operator set: `StreamFrom`, `Default`,
//!   `Delete`, `Eval`, `Shift`, `Sample`, `Log`, `Union`, `Window`, `Mean`,
//!   `Combine`, `Join`, `InfluxOut`, and the autoscale operators.
//! - [`query`] — the batch scheduler: time/cron tickers driving periodic
//!   query issuance.
//! - [`udf`] — the length-delimited message transport to an external
//!   user-defined-function process or socket peer.
//! - [`task`] — [`task::Task`] and [`task::ExecutingTask`], which
//!   materialize a compiled pipeline into a running node graph.
//! - [`task_master`] — ingress fanout keyed by `(database, retention
//!   policy, measurement)`, task lifecycle, and batch scheduling.
//! - [`alert`] — the alert handler interface; no concrete handler ships
//!   here (email/chat/paging are external collaborators).
//! - [`stats`] — the `Int`/`Float`/`Map` counters and gauges every
//!   component above registers into.
//! - [`error`] — [`error::EngineError`], the error hierarchy in §7.
//!
//! Explicit non-goals (interfaces only, no implementation): the DSL
//! lexer/parser that produces a pipeline's AST, the HTTP API, the CLI, the
//! configuration loader, concrete alert handlers, the task-definition
//! storage engine (see `streamtask-checkpoint` for the narrow slice of it
//! this crate does need — snapshot persistence), the embedded query
//! client, and TLS/auth/cipher policy.

pub mod alert;
pub mod edge;
pub mod error;
pub mod eval;
pub mod model;
pub mod node;
pub mod ops;
pub mod query;
pub mod stats;
pub mod task;
pub mod task_master;
pub mod udf;

pub use edge::{EdgeConfig, EdgeKind, EdgeReceiver, EdgeSender};
pub use error::{EngineError, Result};
pub use model::batch::{Batch, BatchPoint};
pub use model::group::GroupId;
pub use model::message::Message;
pub use model::point::{FieldValue, Point};
pub use node::{Node, NodeHandle, NodeState, NodeStats};
pub use task::{ExecutingTask, Task, TaskKind, Template};
pub use task_master::TaskMaster;
