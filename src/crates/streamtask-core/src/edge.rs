//! [`Edge`] — a typed, bounded, ordered channel between two nodes (§4.1).
//!
//! An edge is single-producer, single-consumer. Producing blocks when the
//! buffer is full (back-pressure); `close()` lets remaining buffered
//! messages drain to the consumer before it observes end-of-stream;
//! `abort()` unblocks both sides immediately and is irreversible.

use crate::error::{EngineError, Result};
use crate::model::batch::{BatchHeader, BatchPoint};
use crate::model::message::Message;
use crate::model::point::Point;
use crate::stats::Counter;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// The kind of framing an edge's messages use. A `Stream` edge only ever
/// carries `Point`/`Barrier`/`DeleteGroup`/`Done`; a `Batch` edge carries
/// the `BeginBatch`/`BatchPoint`/`EndBatch` framing (and, from operators
/// that choose to, `BufferedBatch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Stream,
    Batch,
}

#[derive(Debug, Clone, Copy)]
pub struct EdgeConfig {
    /// Buffer size before a producer blocks. Default 1000 per §4.1.
    pub buffer_size: usize,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

#[derive(Default)]
struct EdgeShared {
    collected: Counter,
    emitted: Counter,
    aborted: AtomicBool,
    abort_notify: Notify,
}

/// The producer half of an edge.
pub struct EdgeSender {
    kind: EdgeKind,
    tx: Mutex<Option<mpsc::Sender<Message>>>,
    shared: Arc<EdgeShared>,
}

/// The consumer half of an edge.
pub struct EdgeReceiver {
    kind: EdgeKind,
    rx: mpsc::Receiver<Message>,
    shared: Arc<EdgeShared>,
}

/// Construct a connected sender/receiver pair.
pub fn channel(kind: EdgeKind, config: EdgeConfig) -> (EdgeSender, EdgeReceiver) {
    let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
    let shared = Arc::new(EdgeShared::default());
    (
        EdgeSender { kind, tx: Mutex::new(Some(tx)), shared: shared.clone() },
        EdgeReceiver { kind, rx, shared },
    )
}

impl EdgeSender {
    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    /// Produce one message. Blocks while the buffer is full. Fails with
    /// [`EngineError::EdgeClosed`] once `close()` has been called, or
    /// [`EngineError::EdgeAborted`] once `abort()` has been called (even
    /// mid-block).
    pub async fn collect(&self, msg: Message) -> Result<()> {
        if self.shared.aborted.load(Ordering::Acquire) {
            return Err(EngineError::EdgeAborted);
        }
        let tx = self.tx.lock().unwrap().clone();
        let Some(tx) = tx else { return Err(EngineError::EdgeClosed) };
        tokio::select! {
            biased;
            _ = self.shared.abort_notify.notified() => Err(EngineError::EdgeAborted),
            res = tx.send(msg) => {
                res.map_err(|_| EngineError::EdgeClosed)?;
                self.shared.collected.incr();
                Ok(())
            }
        }
    }

    pub async fn collect_point(&self, point: Point) -> Result<()> {
        debug_assert_eq!(self.kind, EdgeKind::Stream);
        self.collect(Message::Point(point)).await
    }

    /// Produce a full batch as framed `BeginBatch`/`BatchPoint`*/`EndBatch`
    /// messages, per §9's resolution of the `BufferedBatch` open question.
    pub async fn collect_batch(&self, header: BatchHeader, points: Vec<BatchPoint>) -> Result<()> {
        debug_assert_eq!(self.kind, EdgeKind::Batch);
        self.collect(Message::BeginBatch(header.clone())).await?;
        for p in points {
            self.collect(Message::BatchPoint(p)).await?;
        }
        self.collect(Message::EndBatch(header)).await
    }

    pub async fn collect_barrier(&self, t: DateTime<Utc>) -> Result<()> {
        self.collect(Message::Barrier(t)).await
    }

    pub async fn collect_delete_group(&self, group: crate::model::group::GroupId) -> Result<()> {
        self.collect(Message::DeleteGroup(group)).await
    }

    /// Idempotent: signal no more messages will be produced. Buffered
    /// messages still drain to the consumer.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    /// Unblock all producers/consumers immediately. Irreversible.
    pub fn abort(&self) {
        self.shared.aborted.store(true, Ordering::Release);
        self.tx.lock().unwrap().take();
        self.shared.abort_notify.notify_waiters();
    }

    pub fn collected(&self) -> u64 {
        self.shared.collected.get()
    }

    pub fn emitted(&self) -> u64 {
        self.shared.emitted.get()
    }
}

impl EdgeReceiver {
    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    /// Consume one message. Returns `None` at end-of-stream, whether that
    /// end-of-stream is a clean `close()` (after drain) or an `abort()`.
    pub async fn next(&mut self) -> Option<Message> {
        if self.shared.aborted.load(Ordering::Acquire) && self.rx.is_empty() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.shared.abort_notify.notified() => None,
            msg = self.rx.recv() => {
                if msg.is_some() {
                    self.shared.emitted.incr();
                }
                msg
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    pub fn collected(&self) -> u64 {
        self.shared.collected.get()
    }

    pub fn emitted(&self) -> u64 {
        self.shared.emitted.get()
    }
}
