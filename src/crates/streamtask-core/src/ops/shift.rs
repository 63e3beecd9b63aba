//! `Shift` (§4.2): add a fixed signed duration to event time (and `TMax`
//! for batches).

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::Result;
use crate::model::message::Message;
use crate::node::{self, Node, NodeContext, NodeHandle};
use chrono::Duration;

#[derive(Clone, Copy)]
pub struct ShiftOptions {
    pub by: Duration,
}

pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, outs: Vec<EdgeSender>, options: ShiftOptions) -> NodeHandle {
    node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options),
    })
}

async fn run(mut ctx: NodeContext, options: ShiftOptions) -> Result<()> {
    while let Some(msg) = ctx.ins[0].next().await {
        let msg = match msg {
            Message::Point(mut p) => {
                p.time += options.by;
                Message::Point(p)
            }
            Message::BatchPoint(mut bp) => {
                bp.time += options.by;
                Message::BatchPoint(bp)
            }
            Message::BeginBatch(mut h) => {
                h.t_max += options.by;
                Message::BeginBatch(h)
            }
            Message::EndBatch(mut h) => {
                h.t_max += options.by;
                Message::EndBatch(h)
            }
            Message::Barrier(t) => Message::Barrier(t + options.by),
            other => other,
        };
        super::forward_all(&ctx.outs, msg).await?;
    }
    ctx.close_outs();
    Ok(())
}
