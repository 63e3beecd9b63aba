//! `Eval` (§4.2): evaluate an ordered list of named lambdas against each
//! message's field/tag scope, assigning results back under their given
//! names so later expressions in the list can reference earlier ones.
//! Optionally `KEEP`s a field subset and promotes named results to tags.

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::{EngineError, Result};
use crate::eval::{eval, fill_scope, CallState, CompiledExpr, GroupExpressionCache, Scope};
use crate::model::group::GroupId;
use crate::model::message::Message;
use crate::model::point::FieldValue;
use crate::node::{self, Node, NodeContext, NodeHandle};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Default, Clone)]
pub struct EvalOptions {
    pub exprs: Vec<CompiledExpr>,
    pub keep: Option<Vec<String>>,
    pub as_tags: Vec<String>,
}

pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, outs: Vec<EdgeSender>, options: EvalOptions) -> NodeHandle {
    node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options),
    })
}

fn eval_into(
    options: &EvalOptions,
    scope: &mut Scope,
    calls: &mut CallState,
    now: DateTime<Utc>,
    fields: &mut BTreeMap<String, FieldValue>,
    tags: &mut BTreeMap<String, String>,
) -> Result<()> {
    for ce in &options.exprs {
        fill_scope(scope, &ce.refs, now, fields, tags)?;
        let v = eval(&ce.expr, scope, calls)?;
        if options.as_tags.contains(&ce.name) {
            let s = v
                .as_str()
                .ok_or_else(|| EngineError::data("eval", format!("{} must yield a string to become a tag", ce.name)))?;
            tags.insert(ce.name.clone(), s.to_string());
        } else {
            fields.insert(ce.name.clone(), FieldValue::try_from(v)?);
        }
    }
    if let Some(keep) = &options.keep {
        fields.retain(|k, _| keep.contains(k));
    }
    Ok(())
}

async fn run(mut ctx: NodeContext, options: EvalOptions) -> Result<()> {
    let width = options.exprs.iter().map(|e| e.refs.len()).max().unwrap_or(0);
    let mut scope = Scope::with_capacity(width);
    let mut cache = GroupExpressionCache::new();
    let mut current_batch_group: Option<GroupId> = None;

    while let Some(msg) = ctx.ins[0].next().await {
        match msg {
            Message::Point(mut p) => {
                let group = p.group().clone();
                let calls = cache.state_for(&group);
                match eval_into(&options, &mut scope, calls, p.time, &mut p.fields, &mut p.tags) {
                    Ok(()) => {
                        p.recompute_group();
                        super::forward_all(&ctx.outs, Message::Point(p)).await?;
                    }
                    Err(e) => ctx.record_error(&e),
                }
            }
            Message::BeginBatch(h) => {
                current_batch_group = Some(h.group.clone());
                super::forward_all(&ctx.outs, Message::BeginBatch(h)).await?;
            }
            Message::EndBatch(h) => {
                current_batch_group = None;
                super::forward_all(&ctx.outs, Message::EndBatch(h)).await?;
            }
            Message::BatchPoint(mut bp) => {
                let group = current_batch_group.clone().unwrap_or_else(GroupId::nil);
                let calls = cache.state_for(&group);
                match eval_into(&options, &mut scope, calls, bp.time, &mut bp.fields, &mut bp.tags) {
                    Ok(()) => super::forward_all(&ctx.outs, Message::BatchPoint(bp)).await?,
                    Err(e) => ctx.record_error(&e),
                }
            }
            Message::DeleteGroup(g) => {
                cache.forget(&g);
                super::forward_all(&ctx.outs, Message::DeleteGroup(g)).await?;
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
    use crate::eval::{BinaryOp, Expr};
    use crate::model::group::Dimensions;
    use crate::model::point::Point;
    use chrono::Utc;

    #[tokio::test]
    async fn computes_rate_and_keeps_only_requested_fields() {
        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let rate = CompiledExpr::new(
            "rate",
            Expr::Binary(BinaryOp::Div, Box::new(Expr::Ref("errors".into())), Box::new(Expr::Ref("total".into()))),
            vec!["errors".into(), "total".into()],
        );
        let options = EvalOptions { exprs: vec![rate], keep: Some(vec!["rate".into(), "total".into()]), as_tags: vec![] };
        let handle = spawn("eval", src_rx, vec![out_tx], options);

        let p = Point::new(
            "db", "autogen", "cpu", Utc::now(), BTreeMap::new(),
            BTreeMap::from([("total".to_string(), FieldValue::Int(100)), ("errors".to_string(), FieldValue::Int(5))]),
            Dimensions::default(),
        );
        src_tx.collect_point(p).await.unwrap();
        src_tx.close();

        let Message::Point(p) = out_rx.next().await.unwrap() else { panic!() };
        assert!(matches!(p.fields.get("rate"), Some(FieldValue::Float(f)) if (f - 0.05).abs() < 1e-9));
        assert!(p.fields.contains_key("total"));
        assert!(!p.fields.contains_key("errors"));
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn delete_group_purges_call_state() {
        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let counted = CompiledExpr::new(
            "n",
            Expr::Call { kind: crate::eval::CallKind::Count, call_site: 0, args: vec![] },
            vec![],
        );
        let options = EvalOptions { exprs: vec![counted], keep: None, as_tags: vec![] };
        let handle = spawn("eval", src_rx, vec![out_tx], options);

        let p = Point::new("db", "autogen", "cpu", Utc::now(), BTreeMap::new(), BTreeMap::new(), Dimensions::default());
        src_tx.collect_point(p.clone()).await.unwrap();
        src_tx.collect_delete_group(p.group().clone()).await.unwrap();
        src_tx.collect_point(p).await.unwrap();
        src_tx.close();

        let Message::Point(p1) = out_rx.next().await.unwrap() else { panic!() };
        assert!(matches!(p1.fields.get("n"), Some(FieldValue::Int(1))));
        let Message::DeleteGroup(_) = out_rx.next().await.unwrap() else { panic!() };
        let Message::Point(p2) = out_rx.next().await.unwrap() else { panic!() };
        assert!(matches!(p2.fields.get("n"), Some(FieldValue::Int(1))));
        handle.join().await.unwrap();
    }
}
