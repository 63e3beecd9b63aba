//! `Log` (§4.2): format the message as JSON and emit at a configured
//! severity, without altering it.

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::Result;
use crate::model::message::Message;
use crate::node::{self, Node, NodeContext, NodeHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Clone, Copy)]
pub struct LogOptions {
    pub level: Level,
}

pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, outs: Vec<EdgeSender>, options: LogOptions) -> NodeHandle {
    let log_name = name.into();
    let node_name = log_name.clone();
    node::spawn(Node {
        name: node_name,
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options, log_name),
    })
}

fn emit(level: Level, node_name: &str, msg: &Message) {
    let payload = serde_json::to_string(msg).unwrap_or_else(|_| "<unserializable>".to_string());
    match level {
        Level::Debug => tracing::debug!(node = node_name, message = %payload, "log node"),
        Level::Info => tracing::info!(node = node_name, message = %payload, "log node"),
        Level::Warn => tracing::warn!(node = node_name, message = %payload, "log node"),
        Level::Error => tracing::error!(node = node_name, message = %payload, "log node"),
    }
}

async fn run(mut ctx: NodeContext, options: LogOptions, log_name: String) -> Result<()> {
    while let Some(msg) = ctx.ins[0].next().await {
        emit(options.level, &log_name, &msg);
        super::forward_all(&ctx.outs, msg).await?;
    }
    ctx.close_outs();
    Ok(())
}
