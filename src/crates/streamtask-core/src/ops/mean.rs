//! `Mean`: collapses a batch into a single point carrying the arithmetic
//! mean of one named field across the batch's points, as chained after
//! `Window` in `window(period, every) → mean(field)` pipelines. An empty
//! batch stays empty, per the "empty-window" contract (§3).

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::{EngineError, Result};
use crate::model::batch::{BatchHeader, BatchPoint};
use crate::model::message::Message;
use crate::model::point::FieldValue;
use crate::node::{self, Node, NodeContext, NodeHandle};
use std::collections::BTreeMap;

#[derive(Clone)]
pub struct MeanOptions {
    pub field: String,
}

pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, outs: Vec<EdgeSender>, options: MeanOptions) -> NodeHandle {
    node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options),
    })
}

async fn run(mut ctx: NodeContext, options: MeanOptions) -> Result<()> {
    let mut header: Option<BatchHeader> = None;
    let mut sum = 0.0_f64;
    let mut count = 0u64;

    while let Some(msg) = ctx.ins[0].next().await {
        match msg {
            Message::BeginBatch(h) => {
                header = Some(h);
                sum = 0.0;
                count = 0;
            }
            Message::BatchPoint(bp) => match bp.fields.get(&options.field).and_then(FieldValue::as_f64) {
                Some(v) => {
                    sum += v;
                    count += 1;
                }
                None => ctx.record_error(&EngineError::data("mean", format!("missing or non-numeric field '{}'", options.field))),
            },
            Message::EndBatch(h) => {
                let out_header = header.take().unwrap_or(h);
                let points = if count == 0 {
                    vec![]
                } else {
                    vec![BatchPoint {
                        time: out_header.t_max,
                        tags: out_header.tags.clone(),
                        fields: BTreeMap::from([("mean".to_string(), FieldValue::Float(sum / count as f64))]),
                    }]
                };
                super::forward_all(&ctx.outs, Message::BeginBatch(out_header.clone())).await?;
                for p in points {
                    super::forward_all(&ctx.outs, Message::BatchPoint(p)).await?;
                }
                super::forward_all(&ctx.outs, Message::EndBatch(out_header)).await?;
            }
            other => super::forward_all(&ctx.outs, other).await?,
        }
    }
    ctx.close_outs();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{self, EdgeConfig, EdgeKind};
    use crate::model::group::GroupId;
    use chrono::Utc;

    fn header(t_max: chrono::DateTime<Utc>) -> BatchHeader {
        BatchHeader { name: "cpu".into(), group: GroupId::nil(), tags: BTreeMap::new(), dimensions: Default::default(), t_max, by_name: false }
    }

    #[tokio::test]
    async fn averages_the_named_field_across_the_batch() {
        let (src_tx, src_rx) = edge::channel(EdgeKind::Batch, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Batch, EdgeConfig::default());
        let handle = spawn("mean", src_rx, vec![out_tx], MeanOptions { field: "value".into() });

        let h = header(Utc::now());
        src_tx.collect(Message::BeginBatch(h.clone())).await.unwrap();
        for v in 0..60i64 {
            let bp = BatchPoint { time: h.t_max, tags: BTreeMap::new(), fields: BTreeMap::from([("value".to_string(), FieldValue::Int(v))]) };
            src_tx.collect(Message::BatchPoint(bp)).await.unwrap();
        }
        src_tx.collect(Message::EndBatch(h)).await.unwrap();
        src_tx.close();

        assert!(matches!(out_rx.next().await, Some(Message::BeginBatch(_))));
        let Message::BatchPoint(bp) = out_rx.next().await.unwrap() else { panic!("expected a mean point") };
        assert!(matches!(bp.fields.get("mean"), Some(FieldValue::Float(f)) if (f - 29.5).abs() < 1e-9));
        assert!(matches!(out_rx.next().await, Some(Message::EndBatch(_))));
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn an_empty_batch_stays_empty() {
        let (src_tx, src_rx) = edge::channel(EdgeKind::Batch, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Batch, EdgeConfig::default());
        let handle = spawn("mean", src_rx, vec![out_tx], MeanOptions { field: "value".into() });

        let h = header(Utc::now());
        src_tx.collect(Message::BeginBatch(h.clone())).await.unwrap();
        src_tx.collect(Message::EndBatch(h)).await.unwrap();
        src_tx.close();

        assert!(matches!(out_rx.next().await, Some(Message::BeginBatch(_))));
        assert!(matches!(out_rx.next().await, Some(Message::EndBatch(_))));
        handle.join().await.unwrap();
    }
}
