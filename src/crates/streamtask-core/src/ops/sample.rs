//! `Sample` (§4.2): emit either every Nth message per group, or only
//! messages whose event time equals `time.Truncate(duration)`.

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::Result;
use crate::model::group::GroupId;
use crate::model::message::Message;
use crate::model::point::truncate_time;
use crate::node::{self, Node, NodeContext, NodeHandle};
use chrono::Duration;
use std::collections::HashMap;

#[derive(Clone, Copy)]
pub enum SampleMode {
    EveryNth(u64),
    OnDurationBoundary(Duration),
}

#[derive(Clone, Copy)]
pub struct SampleOptions {
    pub mode: SampleMode,
}

pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, outs: Vec<EdgeSender>, options: SampleOptions) -> NodeHandle {
    node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options),
    })
}

async fn run(mut ctx: NodeContext, options: SampleOptions) -> Result<()> {
    let mut counts: HashMap<GroupId, u64> = HashMap::new();
    while let Some(msg) = ctx.ins[0].next().await {
        match &msg {
            Message::Point(p) => {
                let keep = match options.mode {
                    SampleMode::EveryNth(n) => {
                        let count = counts.entry(p.group().clone()).or_insert(0);
                        let emit = *count % n.max(1) == 0;
                        *count += 1;
                        emit
                    }
                    SampleMode::OnDurationBoundary(d) => p.time == truncate_time(p.time, d),
                };
                if keep {
                    super::forward_all(&ctx.outs, msg).await?;
                }
            }
            Message::DeleteGroup(g) => {
                counts.remove(g);
                super::forward_all(&ctx.outs, msg).await?;
            }
            _ => super::forward_all(&ctx.outs, msg).await?,
        }
    }
    ctx.close_outs();
    Ok(())
}
