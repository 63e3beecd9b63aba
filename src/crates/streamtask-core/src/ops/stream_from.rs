//! `StreamFrom` (§4.2): filter points by `(database, retention_policy,
//! measurement)` and an optional lambda predicate; optionally truncate
//! event time; optionally rewrite group dimensions.

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::Result;
use crate::eval::{eval, fill_scope, CallState, CompiledExpr, Scope};
use crate::model::group::Dimensions;
use crate::model::message::Message;
use crate::node::{self, Node, NodeContext, NodeHandle};
use chrono::Duration;

#[derive(Default, Clone)]
pub struct StreamFromOptions {
    pub database: Option<String>,
    pub retention_policy: Option<String>,
    pub measurement: Option<String>,
    pub predicate: Option<CompiledExpr>,
    pub truncate: Option<Duration>,
    pub dimensions: Option<Dimensions>,
}

impl StreamFromOptions {
    fn matches_header(&self, database: &str, rp: &str, measurement: &str) -> bool {
        self.database.as_deref().map_or(true, |d| d == database)
            && self.retention_policy.as_deref().map_or(true, |r| r == rp)
            && self.measurement.as_deref().map_or(true, |m| m == measurement)
    }
}

pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, outs: Vec<EdgeSender>, options: StreamFromOptions) -> NodeHandle {
    node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options),
    })
}

async fn run(mut ctx: NodeContext, options: StreamFromOptions) -> Result<()> {
    let mut scope = Scope::with_capacity(options.predicate.as_ref().map_or(0, |c| c.refs.len()));
    let mut calls = CallState::default();
    let result = drive(&mut ctx, &options, &mut scope, &mut calls).await;
    ctx.drain_ins().await;
    ctx.close_outs();
    result
}

async fn drive(ctx: &mut NodeContext, options: &StreamFromOptions, scope: &mut Scope, calls: &mut CallState) -> Result<()> {
    while let Some(msg) = ctx.ins[0].next().await {
        match msg {
            Message::Point(mut p) => {
                if !options.matches_header(&p.database, &p.retention_policy, &p.measurement) {
                    continue;
                }
                if let Some(predicate) = &options.predicate {
                    if let Err(e) = fill_scope(scope, &predicate.refs, p.time, &p.fields, &p.tags) {
                        ctx.record_error(&e);
                        continue;
                    }
                    match eval(&predicate.expr, scope, calls) {
                        Ok(v) => {
                            if !v.as_bool().unwrap_or(false) {
                                continue;
                            }
                        }
                        Err(e) => {
                            ctx.record_error(&e);
                            continue;
                        }
                    }
                }
                if let Some(truncate) = options.truncate {
                    p.time = crate::model::point::truncate_time(p.time, truncate);
                }
                if let Some(dims) = &options.dimensions {
                    p = p.with_dimensions(dims.clone());
                }
                super::forward_all(&ctx.outs, Message::Point(p)).await?;
            }
            Message::BeginBatch(h) if options.measurement.as_deref().is_some_and(|m| m != h.name) => {
                // Batch for a measurement this node doesn't subscribe to; drop silently.
            }
            Message::EndBatch(h) if options.measurement.as_deref().is_some_and(|m| m != h.name) => {}
            other => super::forward_all(&ctx.outs, other).await?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{self, EdgeConfig, EdgeKind};
    use crate::model::point::{FieldValue, Point};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn point(measurement: &str, host: &str) -> Point {
        Point::new(
            "telegraf", "autogen", measurement, Utc::now(),
            BTreeMap::from([("host".to_string(), host.to_string())]),
            BTreeMap::from([("value".to_string(), FieldValue::Int(1))]),
            Dimensions::default(),
        )
    }

    #[tokio::test]
    async fn filters_by_measurement_and_tag_predicate() {
        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());

        let predicate = CompiledExpr::new(
            "where",
            crate::eval::Expr::Binary(
                crate::eval::BinaryOp::Eq,
                Box::new(crate::eval::Expr::Ref("host".into())),
                Box::new(crate::eval::Expr::Lit(crate::eval::LitValue::Str("A".into()))),
            ),
            vec!["host".into()],
        );
        let options = StreamFromOptions {
            measurement: Some("cpu".into()),
            predicate: Some(predicate),
            ..Default::default()
        };
        let handle = spawn("streamfrom", src_rx, vec![out_tx], options);

        for (m, h) in [("cpu", "A"), ("cpu", "B"), ("mem", "A"), ("cpu", "A")] {
            src_tx.collect_point(point(m, h)).await.unwrap();
        }
        src_tx.close();

        let mut seen = 0;
        while let Some(Message::Point(p)) = out_rx.next().await {
            assert_eq!(p.tags.get("host").unwrap(), "A");
            seen += 1;
        }
        assert_eq!(seen, 2);
        handle.join().await.unwrap();
    }
}
