//! `Default` (§4.2): inject a value for each missing field/tag in a
//! configured set. Never overwrites an existing value.

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::Result;
use crate::model::message::Message;
use crate::model::point::FieldValue;
use crate::node::{self, Node, NodeContext, NodeHandle};
use std::collections::BTreeMap;

#[derive(Default, Clone)]
pub struct DefaultOptions {
    pub fields: BTreeMap<String, FieldValue>,
    pub tags: BTreeMap<String, String>,
}

pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, outs: Vec<EdgeSender>, options: DefaultOptions) -> NodeHandle {
    node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options),
    })
}

fn apply(options: &DefaultOptions, fields: &mut BTreeMap<String, FieldValue>, tags: &mut BTreeMap<String, String>) {
    for (k, v) in &options.fields {
        fields.entry(k.clone()).or_insert_with(|| v.clone());
    }
    for (k, v) in &options.tags {
        tags.entry(k.clone()).or_insert_with(|| v.clone());
    }
}

async fn run(mut ctx: NodeContext, options: DefaultOptions) -> Result<()> {
    while let Some(msg) = ctx.ins[0].next().await {
        let msg = match msg {
            Message::Point(mut p) => {
                apply(&options, &mut p.fields, &mut p.tags);
                p.recompute_group();
                Message::Point(p)
            }
            Message::BatchPoint(mut bp) => {
                apply(&options, &mut bp.fields, &mut bp.tags);
                Message::BatchPoint(bp)
            }
            other => other,
        };
        super::forward_all(&ctx.outs, msg).await?;
    }
    ctx.close_outs();
    Ok(())
}
