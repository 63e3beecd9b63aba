//! `Delete` (§4.2): drop named fields and tags, counting each kind.

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::Result;
use crate::model::message::Message;
use crate::node::{self, Node, NodeContext, NodeHandle};
use crate::stats::Counter;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct DeleteOptions {
    pub fields: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Default)]
pub struct DeleteStats {
    pub fields_dropped: Counter,
    pub tags_dropped: Counter,
}

pub fn spawn(
    name: impl Into<String>,
    ins: EdgeReceiver,
    outs: Vec<EdgeSender>,
    options: DeleteOptions,
) -> (NodeHandle, Arc<DeleteStats>) {
    let stats = Arc::new(DeleteStats::default());
    let stats_for_run = stats.clone();
    let handle = node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options, stats_for_run),
    });
    (handle, stats)
}

fn apply(options: &DeleteOptions, stats: &DeleteStats, fields: &mut std::collections::BTreeMap<String, crate::model::point::FieldValue>, tags: &mut std::collections::BTreeMap<String, String>) {
    for f in &options.fields {
        if fields.remove(f).is_some() {
            stats.fields_dropped.incr();
        }
    }
    for t in &options.tags {
        if tags.remove(t).is_some() {
            stats.tags_dropped.incr();
        }
    }
}

async fn run(mut ctx: NodeContext, options: DeleteOptions, stats: Arc<DeleteStats>) -> Result<()> {
    while let Some(msg) = ctx.ins[0].next().await {
        let msg = match msg {
            Message::Point(mut p) => {
                apply(&options, &stats, &mut p.fields, &mut p.tags);
                p.recompute_group();
                Message::Point(p)
            }
            Message::BatchPoint(mut bp) => {
                apply(&options, &stats, &mut bp.fields, &mut bp.tags);
                Message::BatchPoint(bp)
            }
            other => other,
        };
        super::forward_all(&ctx.outs, msg).await?;
    }
    ctx.close_outs();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{self, EdgeConfig, EdgeKind};
    use crate::model::group::Dimensions;
    use crate::model::point::{FieldValue, Point};
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn drops_named_fields_and_tags_and_counts_them() {
        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let options = DeleteOptions { fields: vec!["debug".into()], tags: vec!["internal".into()] };
        let (handle, stats) = spawn("delete", src_rx, vec![out_tx], options);

        let p = Point::new(
            "db", "autogen", "cpu", Utc::now(),
            BTreeMap::from([("internal".to_string(), "x".to_string())]),
            BTreeMap::from([("debug".to_string(), FieldValue::Bool(true)), ("value".to_string(), FieldValue::Int(1))]),
            Dimensions::default(),
        );
        src_tx.collect_point(p).await.unwrap();
        src_tx.close();

        let Message::Point(p) = out_rx.next().await.unwrap() else { panic!() };
        assert!(!p.fields.contains_key("debug"));
        assert!(!p.tags.contains_key("internal"));
        assert!(p.fields.contains_key("value"));
        assert_eq!(stats.fields_dropped.get(), 1);
        assert_eq!(stats.tags_dropped.get(), 1);
        handle.join().await.unwrap();
    }
}
