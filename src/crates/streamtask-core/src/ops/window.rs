//! `Window` (§4.2): buffers per-group stream points into a trailing
//! `period`-wide window and, every `every` tick, re-emits the window's
//! current contents as a framed batch. With `period == every` this is a
//! tumbling window; a shorter `every` produces overlapping windows.

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::Result;
use crate::model::batch::{BatchHeader, BatchPoint};
use crate::model::group::{Dimensions, GroupId};
use crate::model::message::Message;
use crate::model::point::Point;
use crate::node::{self, Node, NodeContext, NodeHandle};
use crate::query::ticker;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Clone, Copy)]
pub struct WindowOptions {
    pub period: Duration,
    pub every: Duration,
    /// Align ticks to a boundary of `every`, as `query::ticker::every` does.
    pub align: bool,
}

pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, outs: Vec<EdgeSender>, options: WindowOptions) -> NodeHandle {
    node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options),
    })
}

struct GroupWindow {
    measurement: String,
    tags: BTreeMap<String, String>,
    dimensions: Dimensions,
    points: VecDeque<Point>,
}

async fn flush_all(outs: &[EdgeSender], groups: &mut HashMap<GroupId, GroupWindow>, period: Duration, now: DateTime<Utc>) -> Result<()> {
    let cutoff = now - period;
    for (group, win) in groups.iter_mut() {
        while matches!(win.points.front(), Some(p) if p.time < cutoff) {
            win.points.pop_front();
        }
        let header = BatchHeader {
            name: win.measurement.clone(),
            group: group.clone(),
            tags: win.tags.clone(),
            dimensions: win.dimensions.clone(),
            t_max: now,
            by_name: false,
        };
        let points: Vec<BatchPoint> = win.points.iter().map(|p| BatchPoint { time: p.time, tags: p.tags.clone(), fields: p.fields.clone() }).collect();
        super::forward_all(outs, Message::BeginBatch(header.clone())).await?;
        for bp in points {
            super::forward_all(outs, Message::BatchPoint(bp)).await?;
        }
        super::forward_all(outs, Message::EndBatch(header)).await?;
    }
    Ok(())
}

async fn run(mut ctx: NodeContext, options: WindowOptions) -> Result<()> {
    let mut ticker = ticker::every(options.every, options.align)?;
    let mut groups: HashMap<GroupId, GroupWindow> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            tick = ticker.next() => {
                match tick {
                    Some(now) => flush_all(&ctx.outs, &mut groups, options.period, now).await?,
                    None => break,
                }
            }
            msg = ctx.ins[0].next() => {
                match msg {
                    Some(Message::Point(p)) => {
                        let group = p.group().clone();
                        let win = groups.entry(group).or_insert_with(|| GroupWindow {
                            measurement: p.measurement.clone(),
                            tags: p.tags.clone(),
                            dimensions: p.dimensions.clone(),
                            points: VecDeque::new(),
                        });
                        win.points.push_back(p);
                    }
                    Some(Message::DeleteGroup(g)) => {
                        groups.remove(&g);
                        super::forward_all(&ctx.outs, Message::DeleteGroup(g)).await?;
                    }
                    Some(_) => {}
                    None => {
                        flush_all(&ctx.outs, &mut groups, options.period, Utc::now()).await?;
                        break;
                    }
                }
            }
        }
    }
    ticker.stop().await;
    ctx.close_outs();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{self, EdgeConfig, EdgeKind};
    use crate::model::point::FieldValue;
    use chrono::Utc;

    #[tokio::test]
    async fn a_tumbling_window_batches_its_buffered_points_on_every_tick() {
        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Batch, EdgeConfig::default());
        let options = WindowOptions { period: Duration::milliseconds(40), every: Duration::milliseconds(40), align: false };
        let handle = spawn("window", src_rx, vec![out_tx], options);

        for v in 0..3i64 {
            let p = Point::new(
                "db", "autogen", "cpu", Utc::now(),
                BTreeMap::from([("host".to_string(), "a".to_string())]),
                BTreeMap::from([("value".to_string(), FieldValue::Int(v))]),
                Dimensions::new(vec!["host".into()], false),
            );
            src_tx.collect_point(p).await.unwrap();
        }

        let Message::BeginBatch(header) = out_rx.next().await.unwrap() else { panic!("expected BeginBatch") };
        assert_eq!(header.name, "cpu");
        let mut seen = 0;
        loop {
            match out_rx.next().await.unwrap() {
                Message::BatchPoint(_) => seen += 1,
                Message::EndBatch(_) => break,
                other => panic!("unexpected message {:?}", other),
            }
        }
        assert_eq!(seen, 3);

        src_tx.close();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn delete_group_drops_a_groups_buffered_points() {
        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Batch, EdgeConfig::default());
        let options = WindowOptions { period: Duration::milliseconds(500), every: Duration::milliseconds(500), align: false };
        let handle = spawn("window", src_rx, vec![out_tx], options);

        let p = Point::new("db", "autogen", "cpu", Utc::now(), BTreeMap::new(), BTreeMap::new(), Dimensions::default());
        src_tx.collect_point(p.clone()).await.unwrap();
        src_tx.collect_delete_group(p.group().clone()).await.unwrap();
        let Message::DeleteGroup(_) = out_rx.next().await.unwrap() else { panic!("expected DeleteGroup") };

        src_tx.close();
        handle.join().await.unwrap();
    }
}
