//! `Union` (§4.2, §4.5): merges N parents into one time-ordered stream,
//! optionally renaming the measurement. One reader fiber per parent feeds
//! a merge fiber that tracks a low-water mark across parents.

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::Result;
use crate::model::message::Message;
use crate::model::point::Point;
use crate::node::{self, Node, NodeContext, NodeHandle};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

#[derive(Default, Clone)]
pub struct UnionOptions {
    pub rename_measurement: Option<String>,
}

pub fn spawn(name: impl Into<String>, ins: Vec<EdgeReceiver>, outs: Vec<EdgeSender>, options: UnionOptions) -> NodeHandle {
    node::spawn(Node {
        name: name.into(),
        ins,
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options),
    })
}

enum ParentEvent {
    Msg(usize, Message),
    End(usize),
}

/// The minimum "newest observed" time across active parents; `None` means
/// every parent has ended (a full drain is safe). A parent that hasn't
/// produced yet contributes a mark of `DateTime::<Utc>::MIN_UTC`, which
/// blocks emission past it until it does (or it ends).
fn low_water_mark(newest: &[Option<DateTime<Utc>>], ended: &[bool]) -> Option<DateTime<Utc>> {
    if ended.iter().all(|&e| e) {
        return None;
    }
    let mut mark: Option<DateTime<Utc>> = None;
    for (i, n) in newest.iter().enumerate() {
        if ended[i] {
            continue;
        }
        let t = n.unwrap_or(DateTime::<Utc>::MIN_UTC);
        mark = Some(mark.map_or(t, |m| m.min(t)));
    }
    Some(mark.unwrap_or(DateTime::<Utc>::MIN_UTC))
}

/// Pop the earliest buffered point at or before `mark` (`None` = drain
/// everything), breaking ties by lowest parent index.
fn pop_ready(buffers: &mut [VecDeque<Point>], mark: Option<DateTime<Utc>>) -> Option<Point> {
    let mut best: Option<(usize, DateTime<Utc>)> = None;
    for (i, buf) in buffers.iter().enumerate() {
        if let Some(p) = buf.front() {
            if mark.map_or(true, |m| p.time <= m) && best.map_or(true, |(_, bt)| p.time < bt) {
                best = Some((i, p.time));
            }
        }
    }
    best.map(|(i, _)| buffers[i].pop_front().unwrap())
}

async fn run(mut ctx: NodeContext, options: UnionOptions) -> Result<()> {
    let n = ctx.ins.len();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<ParentEvent>((n.max(1)) * 64);
    let ins = std::mem::take(&mut ctx.ins);
    let mut readers = Vec::with_capacity(n);
    for (i, mut inp) in ins.into_iter().enumerate() {
        let tx = tx.clone();
        readers.push(tokio::spawn(async move {
            while let Some(msg) = inp.next().await {
                if tx.send(ParentEvent::Msg(i, msg)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(ParentEvent::End(i)).await;
        }));
    }
    drop(tx);

    let mut buffers: Vec<VecDeque<Point>> = (0..n).map(|_| VecDeque::new()).collect();
    let mut newest: Vec<Option<DateTime<Utc>>> = vec![None; n];
    let mut ended = vec![false; n];
    let result = merge_loop(&mut ctx, &options, &mut rx, &mut buffers, &mut newest, &mut ended).await;

    for r in readers {
        let _ = r.await;
    }
    ctx.close_outs();
    result
}

async fn merge_loop(
    ctx: &mut NodeContext,
    options: &UnionOptions,
    rx: &mut tokio::sync::mpsc::Receiver<ParentEvent>,
    buffers: &mut [VecDeque<Point>],
    newest: &mut [Option<DateTime<Utc>>],
    ended: &mut [bool],
) -> Result<()> {
    while let Some(event) = rx.recv().await {
        match event {
            ParentEvent::Msg(i, Message::Point(mut p)) => {
                if let Some(new_name) = &options.rename_measurement {
                    p.measurement = new_name.clone();
                    p.recompute_group();
                }
                newest[i] = Some(p.time);
                buffers[i].push_back(p);
                let mark = low_water_mark(newest, ended);
                while let Some(p) = pop_ready(buffers, mark) {
                    super::forward_all(&ctx.outs, Message::Point(p)).await?;
                }
            }
            ParentEvent::Msg(_, other) => {
                super::forward_all(&ctx.outs, other).await?;
            }
            ParentEvent::End(i) => {
                ended[i] = true;
                let mark = low_water_mark(newest, ended);
                while let Some(p) = pop_ready(buffers, mark) {
                    super::forward_all(&ctx.outs, Message::Point(p)).await?;
                }
            }
        }
    }
    Ok(())
}
