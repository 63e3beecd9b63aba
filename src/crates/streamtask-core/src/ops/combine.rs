//! `Combine` (§4.4): a self-cross-join over time-bucketed points. When a
//! bucket closes, enumerate K-length index combinations (K = number of
//! predicates) of the bucket's points and, for each combination whose
//! predicate `i` matches element `i`, emit one merged point.

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::{EngineError, Result};
use crate::eval::{eval, fill_scope, CallState, CompiledExpr, Scope};
use crate::model::group::{Dimensions, GroupId};
use crate::model::message::Message;
use crate::model::point::{round_time, FieldValue, Point};
use crate::node::{self, Node, NodeContext, NodeHandle};
use chrono::Duration;
use std::collections::BTreeMap;

#[derive(Clone)]
pub struct CombinePredicate {
    pub name: String,
    pub expr: CompiledExpr,
}

#[derive(Clone)]
pub struct CombineOptions {
    pub database: String,
    pub retention_policy: String,
    pub measurement: String,
    pub dimensions: Dimensions,
    pub predicates: Vec<CombinePredicate>,
    pub tolerance: Duration,
    pub delimiter: String,
    pub max_combinations: usize,
}

pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, outs: Vec<EdgeSender>, options: CombineOptions) -> NodeHandle {
    node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options),
    })
}

/// Advance `idx` (currently a valid ascending `k`-combination of `0..n`)
/// to the lexicographically next one. Iterative per §9's "do not
/// recurse" note.
fn next_combination(idx: &mut [usize], n: usize) -> bool {
    let k = idx.len();
    if k == 0 {
        return false;
    }
    let mut i = k;
    loop {
        if i == 0 {
            return false;
        }
        i -= 1;
        if idx[i] != i + n - k {
            idx[i] += 1;
            for j in i + 1..k {
                idx[j] = idx[j - 1] + 1;
            }
            return true;
        }
    }
}

fn combinations_exceed(n: usize, k: usize, max: usize) -> bool {
    if k == 0 || k > n {
        return false;
    }
    let mut c: u128 = 1;
    for i in 0..k {
        c = c * (n - i) as u128 / (i + 1) as u128;
        if c > max as u128 {
            return true;
        }
    }
    false
}

fn merge(options: &CombineOptions, t: chrono::DateTime<chrono::Utc>, picks: &[&Point]) -> Point {
    let mut fields = BTreeMap::new();
    let mut tags = BTreeMap::new();
    for (i, p) in picks.iter().enumerate() {
        let prefix = &options.predicates[i].name;
        for (k, v) in &p.fields {
            fields.insert(format!("{prefix}{}{k}", options.delimiter), v.clone());
        }
        for (k, v) in &p.tags {
            if options.dimensions.by_name.contains(k) {
                tags.entry(k.clone()).or_insert_with(|| v.clone());
            } else {
                tags.insert(format!("{prefix}{}{k}", options.delimiter), v.clone());
            }
        }
    }
    Point::new(
        options.database.clone(),
        options.retention_policy.clone(),
        options.measurement.clone(),
        t,
        tags,
        fields,
        options.dimensions.clone(),
    )
}

fn predicate_matches(pred: &CombinePredicate, p: &Point, scope: &mut Scope, calls: &mut CallState) -> Result<bool> {
    fill_scope(scope, &pred.expr.refs, p.time, &p.fields, &p.tags)?;
    let v = eval(&pred.expr.expr, scope, calls)?;
    v.as_bool().ok_or_else(|| EngineError::data("combine", "predicate must yield a bool"))
}

async fn close_bucket(ctx: &mut NodeContext, options: &CombineOptions, t: chrono::DateTime<chrono::Utc>, bucket: &[Point]) -> Result<()> {
    let n = bucket.len();
    let k = options.predicates.len();
    if k == 0 || n < k {
        return Ok(());
    }
    if combinations_exceed(n, k, options.max_combinations) {
        return Err(EngineError::data("combine", "too many combinations"));
    }
    let mut idx: Vec<usize> = (0..k).collect();
    let mut scope = Scope::with_capacity(options.predicates.iter().map(|p| p.expr.refs.len()).max().unwrap_or(0));
    let mut calls = CallState::default();
    loop {
        let mut ok = true;
        for (slot, &i) in idx.iter().enumerate() {
            match predicate_matches(&options.predicates[slot], &bucket[i], &mut scope, &mut calls) {
                Ok(true) => {}
                Ok(false) => {
                    ok = false;
                    break;
                }
                Err(e) => {
                    ctx.record_error(&e);
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            let picks: Vec<&Point> = idx.iter().map(|&i| &bucket[i]).collect();
            let merged = merge(options, t, &picks);
            super::forward_all(&ctx.outs, Message::Point(merged)).await?;
        }
        if !next_combination(&mut idx, n) {
            break;
        }
    }
    Ok(())
}

async fn run(mut ctx: NodeContext, options: CombineOptions) -> Result<()> {
    let mut bucket_time: Option<chrono::DateTime<chrono::Utc>> = None;
    let mut bucket: Vec<Point> = Vec::new();

    let result = drive(&mut ctx, &options, &mut bucket_time, &mut bucket).await;
    if result.is_ok() {
        if let Some(t) = bucket_time {
            let final_result = close_bucket(&mut ctx, &options, t, &bucket).await;
            ctx.drain_ins().await;
            ctx.close_outs();
            return final_result;
        }
    }
    ctx.drain_ins().await;
    ctx.close_outs();
    result
}

async fn drive(
    ctx: &mut NodeContext,
    options: &CombineOptions,
    bucket_time: &mut Option<chrono::DateTime<chrono::Utc>>,
    bucket: &mut Vec<Point>,
) -> Result<()> {
    while let Some(msg) = ctx.ins[0].next().await {
        match msg {
            Message::Point(p) => {
                let t = round_time(p.time, options.tolerance);
                match *bucket_time {
                    Some(bt) if t > bt => {
                        close_bucket(ctx, options, bt, bucket).await?;
                        bucket.clear();
                        *bucket_time = Some(t);
                    }
                    Some(_) => {}
                    None => *bucket_time = Some(t),
                }
                bucket.push(p);
            }
            Message::DeleteGroup(g) => {
                super::forward_all(&ctx.outs, Message::DeleteGroup(g)).await?;
            }
            other => super::forward_all(&ctx.outs, other).await?,
        }
    }
    Ok(())
}
