//! `InfluxOut` (§4, §7): the external-write sink. Points are accumulated
//! into a bounded buffer and flushed to a pluggable [`PointWriter`] on
//! size or on a timer, whichever comes first. A failed write is counted
//! as an [`EngineError::External`] and the buffer is dropped — per §7
//! there is no independent retry path for this operator.

use crate::edge::EdgeReceiver;
use crate::error::{EngineError, Result};
use crate::model::message::Message;
use crate::model::point::Point;
use crate::node::{self, Node, NodeContext, NodeHandle};
use async_trait::async_trait;
use std::time::Duration;

/// The write side of an Influx-compatible sink. Implementations live
/// outside this crate; tests use an in-memory recorder.
#[async_trait]
pub trait PointWriter: Send + Sync + 'static {
    async fn write(&self, database: &str, retention_policy: &str, points: &[Point]) -> std::result::Result<(), String>;
}

#[derive(Clone)]
pub struct InfluxOutOptions {
    pub database: String,
    pub retention_policy: String,
    pub buffer_size: usize,
    pub flush_interval: Duration,
}

impl Default for InfluxOutOptions {
    fn default() -> Self {
        Self { database: String::new(), retention_policy: "autogen".into(), buffer_size: 1000, flush_interval: Duration::from_secs(1) }
    }
}

pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, options: InfluxOutOptions, writer: impl PointWriter) -> NodeHandle {
    let writer: std::sync::Arc<dyn PointWriter> = std::sync::Arc::new(writer);
    node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs: vec![],
        on_stop: None,
        make_run: move |ctx| run(ctx, options, writer),
    })
}

async fn flush(ctx: &NodeContext, options: &InfluxOutOptions, writer: &dyn PointWriter, buf: &mut Vec<Point>) {
    if buf.is_empty() {
        return;
    }
    if let Err(err) = writer.write(&options.database, &options.retention_policy, buf).await {
        ctx.record_error(&EngineError::external("influx_out", err));
    }
    buf.clear();
}

async fn run(mut ctx: NodeContext, options: InfluxOutOptions, writer: std::sync::Arc<dyn PointWriter>) -> Result<()> {
    let mut buf: Vec<Point> = Vec::with_capacity(options.buffer_size);
    let mut ticker = tokio::time::interval(options.flush_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = ctx.ins[0].next() => {
                match msg {
                    Some(Message::Point(p)) => {
                        buf.push(p);
                        if buf.len() >= options.buffer_size {
                            flush(&ctx, &options, writer.as_ref(), &mut buf).await;
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = ticker.tick() => {
                flush(&ctx, &options, writer.as_ref(), &mut buf).await;
            }
        }
    }
    flush(&ctx, &options, writer.as_ref(), &mut buf).await;
    ctx.close_outs();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{self, EdgeConfig, EdgeKind};
    use crate::model::group::Dimensions;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingWriter {
        batches: std::sync::Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl PointWriter for RecordingWriter {
        async fn write(&self, _database: &str, _retention_policy: &str, points: &[Point]) -> std::result::Result<(), String> {
            self.batches.lock().unwrap().push(points.len());
            Ok(())
        }
    }

    #[tokio::test]
    async fn flushes_once_the_buffer_size_is_reached() {
        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let writer = RecordingWriter::default();
        let batches = writer.batches.clone();
        let options = InfluxOutOptions { database: "db".into(), buffer_size: 2, flush_interval: Duration::from_secs(3600), ..Default::default() };
        let handle = spawn("influx_out", src_rx, options, writer);

        for _ in 0..5 {
            let p = Point::new("db", "autogen", "cpu", Utc::now(), BTreeMap::new(), BTreeMap::new(), Dimensions::default());
            src_tx.collect_point(p).await.unwrap();
        }
        src_tx.close();
        handle.join().await.unwrap();

        assert_eq!(*batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn a_write_failure_is_counted_and_does_not_kill_the_node() {
        struct FailingWriter;
        #[async_trait]
        impl PointWriter for FailingWriter {
            async fn write(&self, _d: &str, _r: &str, _points: &[Point]) -> std::result::Result<(), String> {
                Err("connection refused".into())
            }
        }
        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let options = InfluxOutOptions { database: "db".into(), buffer_size: 1, flush_interval: Duration::from_secs(3600), ..Default::default() };
        let handle = spawn("influx_out", src_rx, options, FailingWriter);

        let p = Point::new("db", "autogen", "cpu", Utc::now(), BTreeMap::new(), BTreeMap::new(), Dimensions::default());
        src_tx.collect_point(p).await.unwrap();
        src_tx.close();
        handle.join().await.unwrap();
        assert_eq!(handle.stats().errors.get(), 1);
    }
}
