//! The concrete operator set (§4.2, §4.4–§4.7): the thin stateless
//! operators, `Combine`, `Union`/`Join`, the batch `Query` operator (in
//! [`crate::query`]), and the autoscale cooldown state machine.
//!
//! Every operator follows the same shape: an `Options` struct (the
//! "configuration" ambient concern), a `spawn(...)` constructor that
//! returns a [`crate::node::NodeHandle`], and — for stateful operators —
//! a `SnapshotHandle` a caller can poll independently of the running
//! node, mirroring how `streamtask-checkpoint`'s store is consulted
//! alongside, not inside, node execution.

pub mod autoscale;
pub mod combine;
pub mod default_op;
pub mod delete;
pub mod eval_op;
pub mod influx_out;
pub mod join;
pub mod log_op;
pub mod mean;
pub mod sample;
pub mod shift;
pub mod stream_from;
pub mod union;
pub mod window;

use crate::edge::EdgeSender;
use crate::error::Result;
use crate::model::message::Message;

/// Forward `msg` to every child edge. Most operators have exactly one
/// child; fan-out nodes (a tee in the pipeline) have more, and all
/// children see an identical copy.
pub(crate) async fn forward_all(outs: &[EdgeSender], msg: Message) -> Result<()> {
    for out in outs {
        out.collect(msg.clone()).await?;
    }
    Ok(())
}

pub(crate) fn close_all(outs: &[EdgeSender]) {
    for out in outs {
        out.close();
    }
}
