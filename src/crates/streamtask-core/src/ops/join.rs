//! `Join` (§4.5): a multi-parent time-tolerance join keyed by a set of
//! `on` dimensions. One reader fiber per parent feeds a merge fiber.
//!
//! Every incoming point is classified as **specific** (it carries tags
//! beyond `on`) or **match** (its tags are a subset of `on`). Each inner
//! group (identity = `on`-dimension tag values) keeps a `matchBuffer` and
//! a `specificBuffer` per parent; a specific arrival scans the other
//! parents' match buffers for an entry at the same rounded time and, if
//! found, copies its own extra tags onto a shallow copy of the matched
//! point before both are dropped into a per-outer-group (full tag
//! identity) joinset keyed by rounded time. A match arrival does the
//! mirror scan over the waiting specifics. This lets a more-specific
//! child series (e.g. per-disk points) join against a shared,
//! less-specific parent series (e.g. a per-host point) without requiring
//! the child to carry every parent tag.
//!
//! A joinset is ready once every parent has a slot filled; otherwise it
//! is flushed once the inner group's low-water mark (the minimum, across
//! parents, of the newest rounded time reported) passes it. Framed batch
//! input is buffered per parent from `BeginBatch` to `EndBatch`; once
//! every parent has closed a batch, the buffers are co-iterated by
//! rounded time and the result is forwarded as one [`Message::BufferedBatch`].

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::Result;
use crate::model::batch::{Batch, BatchHeader, BatchPoint};
use crate::model::group::{Dimensions, GroupId};
use crate::model::message::Message;
use crate::model::point::{round_time, FieldValue, Point};
use crate::node::{self, Node, NodeContext, NodeHandle};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy)]
pub enum FillPolicy {
    /// Missing contributions are present as [`FieldValue::Null`], one per
    /// field previously observed from that parent.
    Null,
    /// An incomplete tuple is dropped entirely: an inner join.
    NoFill,
    /// Missing contributions are filled with a constant, one field per
    /// name previously observed from that parent.
    Value(f64),
}

#[derive(Clone)]
pub struct JoinOptions {
    pub database: String,
    pub retention_policy: String,
    pub measurement: String,
    pub on: Vec<String>,
    pub tolerance: Duration,
    pub fill: FillPolicy,
    pub delimiter: String,
    pub names: Vec<String>,
}

pub fn spawn(name: impl Into<String>, ins: Vec<EdgeReceiver>, outs: Vec<EdgeSender>, options: JoinOptions) -> NodeHandle {
    node::spawn(Node {
        name: name.into(),
        ins,
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options),
    })
}

enum ParentEvent {
    Msg(usize, Point),
    BatchBegin(usize, BatchHeader),
    BatchPoint(usize, BatchPoint),
    BatchEnd(usize, BatchHeader),
    Other(Message),
    End(usize),
}

struct JoinSet {
    t: DateTime<Utc>,
    slots: Vec<Option<Point>>,
}

impl JoinSet {
    fn new(n: usize, t: DateTime<Utc>) -> Self {
        Self { t, slots: vec![None; n] }
    }

    fn is_ready(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}

/// Per-parent `lowMarks`/`matchBuffer`/`specificBuffer` bookkeeping for
/// one inner group (§4.5 steps 1-3).
struct InnerGroupState {
    head: Vec<Option<DateTime<Utc>>>,
    match_buffer: Vec<BTreeMap<DateTime<Utc>, Point>>,
    specific_buffer: Vec<BTreeMap<DateTime<Utc>, Vec<Point>>>,
}

impl InnerGroupState {
    fn new(n: usize) -> Self {
        Self { head: vec![None; n], match_buffer: vec![BTreeMap::new(); n], specific_buffer: vec![BTreeMap::new(); n] }
    }

    fn all_reported(&self) -> bool {
        self.head.iter().all(Option::is_some)
    }

    fn low_mark(&self) -> Option<DateTime<Utc>> {
        if !self.all_reported() {
            return None;
        }
        self.head.iter().flatten().min().copied()
    }
}

/// One outer group's joinsets: the full-tag-identity bucket a matched
/// pair (or a lone all-reported specific) is emitted into (§4.5 step 7).
struct OuterGroupState {
    inner: GroupId,
    group_tags: BTreeMap<String, String>,
    sets: BTreeMap<DateTime<Utc>, JoinSet>,
    known_fields: Vec<Vec<String>>,
}

impl OuterGroupState {
    fn new(n: usize, inner: GroupId, group_tags: BTreeMap<String, String>) -> Self {
        Self { inner, group_tags, sets: BTreeMap::new(), known_fields: vec![Vec::new(); n] }
    }
}

/// A point whose tags reach beyond `on` is specific; one that stays
/// within `on` is a match and can pair with any specific sharing its
/// `on`-tag values.
fn is_specific(on: &[String], tags: &BTreeMap<String, String>) -> bool {
    tags.keys().any(|k| !on.contains(k))
}

fn extra_dims(on: &[String], tags: &BTreeMap<String, String>) -> Vec<String> {
    let mut names: Vec<String> = on.to_vec();
    for k in tags.keys() {
        if !on.contains(k) {
            names.push(k.clone());
        }
    }
    names.sort();
    names.dedup();
    names
}

/// The identity a point's contribution is filed under: `on` alone for a
/// match (which makes a match's outer group coincide with its inner
/// group), `on` plus its own extra tags for a specific.
fn outer_group_id(measurement: &str, on: &[String], tags: &BTreeMap<String, String>) -> GroupId {
    GroupId::derive(measurement, &Dimensions::new(extra_dims(on, tags), false), tags)
}

/// Copy a specific point's extra tags onto a shallow copy of the matched
/// point and recompute its group, producing the matched parent's
/// contribution to the specific's outer group (§4.5 step 6).
fn promote_match(matched: &Point, specific: &Point, on: &[String]) -> Point {
    let mut tags = matched.tags.clone();
    for (k, v) in &specific.tags {
        if !on.contains(k) {
            tags.insert(k.clone(), v.clone());
        }
    }
    let dims = Dimensions::new(extra_dims(on, &specific.tags), false);
    let mut out = matched.clone();
    out.tags = tags;
    out.dimensions = dims;
    out.recompute_group();
    out
}

fn merge(options: &JoinOptions, group_tags: &BTreeMap<String, String>, set: &JoinSet, known: &[Vec<String>]) -> Option<Point> {
    let mut fields = BTreeMap::new();
    let mut tags = group_tags.clone();
    let mut any_missing = false;
    for (i, slot) in set.slots.iter().enumerate() {
        let name = &options.names[i];
        match slot {
            Some(p) => {
                for (k, v) in &p.fields {
                    fields.insert(format!("{name}{}{k}", options.delimiter), v.clone());
                }
                for (k, v) in &p.tags {
                    if !options.on.contains(k) {
                        tags.insert(format!("{name}{}{k}", options.delimiter), v.clone());
                    }
                }
            }
            None => {
                any_missing = true;
                fill_missing(options, &mut fields, name, &known[i]);
            }
        }
    }
    if any_missing && matches!(options.fill, FillPolicy::NoFill) {
        return None;
    }
    Some(Point::new(
        options.database.clone(),
        options.retention_policy.clone(),
        options.measurement.clone(),
        set.t,
        tags,
        fields,
        Dimensions::new(options.on.clone(), false),
    ))
}

fn fill_missing(options: &JoinOptions, fields: &mut BTreeMap<String, FieldValue>, name: &str, known: &[String]) {
    match options.fill {
        FillPolicy::NoFill => {}
        FillPolicy::Null => {
            for field_name in known {
                fields.insert(format!("{name}{}{field_name}", options.delimiter), FieldValue::Null);
            }
        }
        FillPolicy::Value(v) => {
            for field_name in known {
                fields.insert(format!("{name}{}{field_name}", options.delimiter), FieldValue::Float(v));
            }
        }
    }
}

fn merge_batch(options: &JoinOptions, group_tags: &BTreeMap<String, String>, t: DateTime<Utc>, slots: &[Option<BatchPoint>], known: &[Vec<String>]) -> Option<BatchPoint> {
    let mut fields = BTreeMap::new();
    let mut tags = group_tags.clone();
    let mut any_missing = false;
    for (i, slot) in slots.iter().enumerate() {
        let name = &options.names[i];
        match slot {
            Some(bp) => {
                for (k, v) in &bp.fields {
                    fields.insert(format!("{name}{}{k}", options.delimiter), v.clone());
                }
                for (k, v) in &bp.tags {
                    if !options.on.contains(k) {
                        tags.insert(format!("{name}{}{k}", options.delimiter), v.clone());
                    }
                }
            }
            None => {
                any_missing = true;
                fill_missing(options, &mut fields, name, &known[i]);
            }
        }
    }
    if any_missing && matches!(options.fill, FillPolicy::NoFill) {
        return None;
    }
    Some(BatchPoint { time: t, tags, fields })
}

async fn flush(ctx: &mut NodeContext, options: &JoinOptions, group_tags: &BTreeMap<String, String>, set: JoinSet, known: &[Vec<String>]) -> Result<()> {
    if let Some(p) = merge(options, group_tags, &set, known) {
        super::forward_all(&ctx.outs, Message::Point(p)).await?;
    }
    Ok(())
}

fn insert_slot(
    outer_groups: &mut HashMap<GroupId, OuterGroupState>,
    inner_id: &GroupId,
    outer_id: &GroupId,
    group_tags: &BTreeMap<String, String>,
    n: usize,
    parent: usize,
    point: Point,
    tolerance: Duration,
) -> DateTime<Utc> {
    let t = round_time(point.time, tolerance);
    let state = outer_groups.entry(outer_id.clone()).or_insert_with(|| OuterGroupState::new(n, inner_id.clone(), group_tags.clone()));
    for f in point.fields.keys() {
        if !state.known_fields[parent].contains(f) {
            state.known_fields[parent].push(f.clone());
        }
    }
    state.sets.entry(t).or_insert_with(|| JoinSet::new(n, t)).slots[parent] = Some(point);
    t
}

async fn check_ready(ctx: &mut NodeContext, options: &JoinOptions, outer_groups: &mut HashMap<GroupId, OuterGroupState>, outer_id: &GroupId, t: DateTime<Utc>) -> Result<()> {
    let ready = outer_groups.get(outer_id).and_then(|s| s.sets.get(&t)).map(JoinSet::is_ready).unwrap_or(false);
    if !ready {
        return Ok(());
    }
    if let Some(state) = outer_groups.get_mut(outer_id) {
        if let Some(set) = state.sets.remove(&t) {
            let group_tags = state.group_tags.clone();
            let known = state.known_fields.clone();
            flush(ctx, options, &group_tags, set, &known).await?;
        }
    }
    Ok(())
}

async fn flush_stale(ctx: &mut NodeContext, options: &JoinOptions, outer_groups: &mut HashMap<GroupId, OuterGroupState>, inner_id: &GroupId, low_mark: DateTime<Utc>) -> Result<()> {
    let targets: Vec<GroupId> = outer_groups.iter().filter(|(_, s)| &s.inner == inner_id).map(|(g, _)| g.clone()).collect();
    for outer_id in targets {
        let stale: Vec<DateTime<Utc>> = outer_groups
            .get(&outer_id)
            .map(|s| s.sets.keys().filter(|&&t| t < low_mark).copied().collect())
            .unwrap_or_default();
        for t in stale {
            if let Some(state) = outer_groups.get_mut(&outer_id) {
                if let Some(set) = state.sets.remove(&t) {
                    let group_tags = state.group_tags.clone();
                    let known = state.known_fields.clone();
                    flush(ctx, options, &group_tags, set, &known).await?;
                }
            }
        }
    }
    Ok(())
}

async fn handle_point(
    ctx: &mut NodeContext,
    options: &JoinOptions,
    inner_groups: &mut HashMap<GroupId, InnerGroupState>,
    outer_groups: &mut HashMap<GroupId, OuterGroupState>,
    i: usize,
    p: Point,
    n: usize,
) -> Result<()> {
    let on_dims = Dimensions::new(options.on.clone(), false);
    let inner_id = GroupId::derive(&p.measurement, &on_dims, &p.tags);
    let group_tags: BTreeMap<String, String> = options.on.iter().filter_map(|k| p.tags.get(k).map(|v| (k.clone(), v.clone()))).collect();
    let t = round_time(p.time, options.tolerance);
    let specific = is_specific(&options.on, &p.tags);
    let outer_id = outer_group_id(&p.measurement, &options.on, &p.tags);

    {
        let inner = inner_groups.entry(inner_id.clone()).or_insert_with(|| InnerGroupState::new(n));
        inner.head[i] = Some(t);
        if specific {
            inner.specific_buffer[i].entry(t).or_default().push(p.clone());
        } else {
            inner.match_buffer[i].insert(t, p.clone());
        }
    }

    let mut touched = vec![(outer_id.clone(), insert_slot(outer_groups, &inner_id, &outer_id, &group_tags, n, i, p.clone(), options.tolerance))];

    if specific {
        let matches: Vec<(usize, Point)> = inner_groups
            .get(&inner_id)
            .map(|inner| {
                inner
                    .match_buffer
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k != i)
                    .filter_map(|(k, buf)| buf.get(&t).map(|mp| (k, mp.clone())))
                    .collect()
            })
            .unwrap_or_default();
        for (k, mp) in matches {
            let clone = promote_match(&mp, &p, &options.on);
            let t2 = insert_slot(outer_groups, &inner_id, &outer_id, &group_tags, n, k, clone, options.tolerance);
            touched.push((outer_id.clone(), t2));
        }
    } else {
        let specifics: Vec<(usize, Vec<Point>)> = inner_groups
            .get(&inner_id)
            .map(|inner| {
                inner
                    .specific_buffer
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k != i)
                    .filter_map(|(k, buf)| buf.get(&t).map(|v| (k, v.clone())))
                    .collect()
            })
            .unwrap_or_default();
        for (_k, sps) in specifics {
            for sp in sps {
                let sp_outer = outer_group_id(&sp.measurement, &options.on, &sp.tags);
                let clone = promote_match(&p, &sp, &options.on);
                let t2 = insert_slot(outer_groups, &inner_id, &sp_outer, &group_tags, n, i, clone, options.tolerance);
                touched.push((sp_outer, t2));
            }
        }
    }

    for (outer, t) in touched {
        check_ready(ctx, options, outer_groups, &outer, t).await?;
    }

    let low_mark = inner_groups.get(&inner_id).and_then(InnerGroupState::low_mark);
    if let Some(mark) = low_mark {
        flush_stale(ctx, options, outer_groups, &inner_id, mark).await?;
    }
    Ok(())
}

async fn emit_joined_batch(ctx: &mut NodeContext, options: &JoinOptions, pending: &mut [Option<(BatchHeader, Vec<BatchPoint>)>]) -> Result<()> {
    let batches: Vec<(BatchHeader, Vec<BatchPoint>)> = pending.iter_mut().map(|slot| slot.take().expect("all parents ready")).collect();

    let mut buckets: BTreeMap<DateTime<Utc>, Vec<Option<BatchPoint>>> = BTreeMap::new();
    let mut known: Vec<Vec<String>> = vec![Vec::new(); batches.len()];
    for (i, (_, points)) in batches.iter().enumerate() {
        for bp in points {
            let t = round_time(bp.time, options.tolerance);
            let slot = buckets.entry(t).or_insert_with(|| vec![None; batches.len()]);
            slot[i] = Some(bp.clone());
            for f in bp.fields.keys() {
                if !known[i].contains(f) {
                    known[i].push(f.clone());
                }
            }
        }
    }

    let group_tags: BTreeMap<String, String> = options
        .on
        .iter()
        .filter_map(|k| batches.first().and_then(|(h, _)| h.tags.get(k)).map(|v| (k.clone(), v.clone())))
        .collect();
    let t_max = batches.iter().map(|(h, _)| h.t_max).max().unwrap_or_else(|| buckets.keys().next_back().copied().unwrap_or(Utc::now()));

    let mut out_points = Vec::new();
    for (t, slots) in buckets {
        if let Some(bp) = merge_batch(options, &group_tags, t, &slots, &known) {
            out_points.push(bp);
        }
    }

    let dims = Dimensions::new(options.on.clone(), false);
    let header = BatchHeader {
        name: options.measurement.clone(),
        group: GroupId::derive(&options.measurement, &dims, &group_tags),
        tags: group_tags,
        dimensions: dims,
        t_max,
        by_name: false,
    };
    super::forward_all(&ctx.outs, Message::BufferedBatch(Batch::new(header, out_points))).await
}

async fn run(mut ctx: NodeContext, options: JoinOptions) -> Result<()> {
    let n = ctx.ins.len();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<ParentEvent>(n.max(1) * 64);
    let ins = std::mem::take(&mut ctx.ins);
    let mut readers = Vec::with_capacity(n);
    for (i, mut inp) in ins.into_iter().enumerate() {
        let tx = tx.clone();
        readers.push(tokio::spawn(async move {
            while let Some(msg) = inp.next().await {
                let event = match msg {
                    Message::Point(p) => ParentEvent::Msg(i, p),
                    Message::BeginBatch(h) => ParentEvent::BatchBegin(i, h),
                    Message::BatchPoint(bp) => ParentEvent::BatchPoint(i, bp),
                    Message::EndBatch(h) => ParentEvent::BatchEnd(i, h),
                    other => ParentEvent::Other(other),
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(ParentEvent::End(i)).await;
        }));
    }
    drop(tx);

    let mut inner_groups: HashMap<GroupId, InnerGroupState> = HashMap::new();
    let mut outer_groups: HashMap<GroupId, OuterGroupState> = HashMap::new();
    let mut batch_bufs: Vec<Option<(BatchHeader, Vec<BatchPoint>)>> = vec![None; n];
    let mut pending_batches: Vec<Option<(BatchHeader, Vec<BatchPoint>)>> = vec![None; n];
    let mut ended = vec![false; n];
    let result = merge_loop(&mut ctx, &options, &mut rx, &mut inner_groups, &mut outer_groups, &mut batch_bufs, &mut pending_batches, &mut ended, n).await;

    for r in readers {
        let _ = r.await;
    }
    ctx.close_outs();
    result
}

#[allow(clippy::too_many_arguments)]
async fn merge_loop(
    ctx: &mut NodeContext,
    options: &JoinOptions,
    rx: &mut tokio::sync::mpsc::Receiver<ParentEvent>,
    inner_groups: &mut HashMap<GroupId, InnerGroupState>,
    outer_groups: &mut HashMap<GroupId, OuterGroupState>,
    batch_bufs: &mut [Option<(BatchHeader, Vec<BatchPoint>)>],
    pending_batches: &mut [Option<(BatchHeader, Vec<BatchPoint>)>],
    ended: &mut [bool],
    n: usize,
) -> Result<()> {
    while let Some(event) = rx.recv().await {
        match event {
            ParentEvent::Msg(i, p) => {
                handle_point(ctx, options, inner_groups, outer_groups, i, p, n).await?;
            }
            ParentEvent::BatchBegin(i, h) => {
                batch_bufs[i] = Some((h, Vec::new()));
            }
            ParentEvent::BatchPoint(i, bp) => {
                if let Some((_, pts)) = batch_bufs[i].as_mut() {
                    pts.push(bp);
                }
            }
            ParentEvent::BatchEnd(i, h) => {
                let buf = batch_bufs[i].take().unwrap_or((h, Vec::new()));
                pending_batches[i] = Some(buf);
                if pending_batches.iter().all(Option::is_some) {
                    emit_joined_batch(ctx, options, pending_batches).await?;
                }
            }
            ParentEvent::Other(msg) => {
                super::forward_all(&ctx.outs, msg).await?;
            }
            ParentEvent::End(i) => {
                ended[i] = true;
                if ended.iter().all(|&e| e) {
                    let ids: Vec<GroupId> = outer_groups.keys().cloned().collect();
                    for outer_id in ids {
                        let times: Vec<DateTime<Utc>> = outer_groups.get(&outer_id).map(|s| s.sets.keys().copied().collect()).unwrap_or_default();
                        for t in times {
                            if let Some(state) = outer_groups.get_mut(&outer_id) {
                                if let Some(set) = state.sets.remove(&t) {
                                    let group_tags = state.group_tags.clone();
                                    let known = state.known_fields.clone();
                                    flush(ctx, options, &group_tags, set, &known).await?;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{self, EdgeConfig, EdgeKind};
    use chrono::TimeZone;
    use std::collections::BTreeMap as Map;

    fn point(t: DateTime<Utc>, value: i64) -> Point {
        Point::new("db", "autogen", "cpu", t, Map::new(), Map::from([("value".to_string(), FieldValue::Int(value))]), Dimensions::default())
    }

    fn tagged_point(measurement: &str, t: DateTime<Utc>, tags: &[(&str, &str)], value: i64) -> Point {
        let tags = tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Point::new("db", "autogen", measurement, t, tags, Map::from([("value".to_string(), FieldValue::Int(value))]), Dimensions::default())
    }

    #[tokio::test]
    async fn null_fill_emits_a_null_filled_tuple_once_the_group_head_advances() {
        let (l_tx, l_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (r_tx, r_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let options = JoinOptions {
            database: "db".into(),
            retention_policy: "autogen".into(),
            measurement: "cpu_joined".into(),
            on: vec![],
            tolerance: Duration::seconds(1),
            fill: FillPolicy::Null,
            delimiter: ".".into(),
            names: vec!["L".into(), "R".into()],
        };
        let handle = spawn("join", vec![l_rx, r_rx], vec![out_tx], options);

        let t0 = Utc.timestamp_opt(0, 0).unwrap();
        l_tx.collect_point(point(t0, 1)).await.unwrap();
        r_tx.collect_point(point(t0 + Duration::seconds(1), 9)).await.unwrap();
        l_tx.close();
        r_tx.close();

        let Message::Point(merged) = out_rx.next().await.unwrap() else { panic!() };
        assert!(matches!(merged.fields.get("L.value"), Some(FieldValue::Int(1))));
        assert!(matches!(merged.fields.get("R.value"), Some(FieldValue::Null)));
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn no_fill_drops_incomplete_tuples() {
        let (l_tx, l_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (r_tx, r_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let options = JoinOptions {
            database: "db".into(),
            retention_policy: "autogen".into(),
            measurement: "cpu_joined".into(),
            on: vec![],
            tolerance: Duration::seconds(1),
            fill: FillPolicy::NoFill,
            delimiter: ".".into(),
            names: vec!["L".into(), "R".into()],
        };
        let handle = spawn("join", vec![l_rx, r_rx], vec![out_tx], options);

        let t0 = Utc.timestamp_opt(0, 0).unwrap();
        l_tx.collect_point(point(t0, 1)).await.unwrap();
        l_tx.close();
        r_tx.close();

        assert!(out_rx.next().await.is_none());
        handle.join().await.unwrap();
    }

    /// A per-disk ("specific") series joins against a shared per-host
    /// ("match") series even though the two never carry identical tag
    /// sets, per §4.5's specific/match cross-join.
    #[tokio::test]
    async fn a_specific_series_joins_against_a_shared_match_series() {
        let (disk_tx, disk_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (host_tx, host_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let options = JoinOptions {
            database: "db".into(),
            retention_policy: "autogen".into(),
            measurement: "joined".into(),
            on: vec!["host".into()],
            tolerance: Duration::seconds(1),
            fill: FillPolicy::NoFill,
            delimiter: ".".into(),
            names: vec!["disk".into(), "host".into()],
        };
        let handle = spawn("join", vec![disk_rx, host_rx], vec![out_tx], options);

        let t0 = Utc.timestamp_opt(0, 0).unwrap();
        disk_tx.collect_point(tagged_point("disk", t0, &[("host", "A"), ("disk", "sda")], 10)).await.unwrap();
        disk_tx.collect_point(tagged_point("disk", t0, &[("host", "A"), ("disk", "sdb")], 20)).await.unwrap();
        host_tx.collect_point(tagged_point("cpu", t0, &[("host", "A")], 99)).await.unwrap();
        disk_tx.close();
        host_tx.close();

        let mut merged = Vec::new();
        while let Some(Message::Point(p)) = out_rx.next().await {
            merged.push(p);
        }
        assert_eq!(merged.len(), 2);
        for p in &merged {
            assert_eq!(p.tags.get("host").unwrap(), "A");
            assert!(matches!(p.fields.get("host.value"), Some(FieldValue::Int(99))));
        }
        let disks: Vec<&str> = merged.iter().map(|p| p.tags.get("disk.disk").unwrap().as_str()).collect();
        assert!(disks.contains(&"sda"));
        assert!(disks.contains(&"sdb"));

        handle.join().await.unwrap();
    }

    /// Batch input from every parent is co-iterated by rounded time and
    /// forwarded as a single buffered batch (§4.5 step 9).
    #[tokio::test]
    async fn batch_inputs_are_joined_into_one_buffered_batch() {
        let (l_tx, l_rx) = edge::channel(EdgeKind::Batch, EdgeConfig::default());
        let (r_tx, r_rx) = edge::channel(EdgeKind::Batch, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Batch, EdgeConfig::default());
        let options = JoinOptions {
            database: "db".into(),
            retention_policy: "autogen".into(),
            measurement: "cpu_joined".into(),
            on: vec![],
            tolerance: Duration::seconds(1),
            fill: FillPolicy::Null,
            delimiter: ".".into(),
            names: vec!["L".into(), "R".into()],
        };
        let handle = spawn("join", vec![l_rx, r_rx], vec![out_tx], options);

        let t0 = Utc.timestamp_opt(0, 0).unwrap();
        let header = BatchHeader { name: "cpu".into(), group: GroupId::nil(), tags: Map::new(), dimensions: Dimensions::default(), t_max: t0, by_name: false };

        l_tx.collect(Message::BeginBatch(header.clone())).await.unwrap();
        l_tx.collect(Message::BatchPoint(BatchPoint { time: t0, tags: Map::new(), fields: Map::from([("value".to_string(), FieldValue::Int(1))]) })).await.unwrap();
        l_tx.collect(Message::EndBatch(header.clone())).await.unwrap();

        r_tx.collect(Message::BeginBatch(header.clone())).await.unwrap();
        r_tx.collect(Message::BatchPoint(BatchPoint { time: t0, tags: Map::new(), fields: Map::from([("value".to_string(), FieldValue::Int(2))]) })).await.unwrap();
        r_tx.collect(Message::EndBatch(header)).await.unwrap();

        l_tx.close();
        r_tx.close();

        let Message::BufferedBatch(batch) = out_rx.next().await.unwrap() else { panic!("expected a buffered batch") };
        assert_eq!(batch.points.len(), 1);
        assert!(matches!(batch.points[0].fields.get("L.value"), Some(FieldValue::Int(1))));
        assert!(matches!(batch.points[0].fields.get("R.value"), Some(FieldValue::Int(2))));

        handle.join().await.unwrap();
    }
}
