//! The `Query` operator (§4.6): a source node with no parent edges. On
//! each ticker firing it issues a query against a named cluster client
//! and converts each result into one batch per group.

use super::ticker::Ticker;
use crate::edge::EdgeSender;
use crate::error::{EngineError, Result};
use crate::model::batch::{Batch, BatchHeader, BatchPoint};
use crate::model::group::{Dimensions, GroupId};
use crate::model::message::Message;
use crate::node::{self, Node, NodeContext, NodeHandle};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// One group's worth of rows returned by a query.
pub struct QueryResultGroup {
    pub tags: BTreeMap<String, String>,
    pub points: Vec<BatchPoint>,
}

pub struct QueryResponse {
    pub groups: Vec<QueryResultGroup>,
}

/// The embedded time-series query client boundary; concrete clients are
/// external collaborators.
#[async_trait]
pub trait QueryClient: Send + Sync + 'static {
    async fn query(&self, command: &str) -> std::result::Result<QueryResponse, String>;
}

#[derive(Clone)]
pub struct QueryOptions {
    pub database: String,
    pub retention_policy: String,
    pub measurement: String,
    pub period: Duration,
    pub offset: Duration,
    pub dimensions: Dimensions,
}

/// Render the query command text for a `[start, stop)` window. Plugged in
/// by the pipeline compiler that owns the query-template DSL; this crate
/// does not parse query templates itself.
pub type QueryTemplate = Box<dyn Fn(DateTime<Utc>, DateTime<Utc>) -> String + Send + Sync>;

/// The deterministic `(start, stop)` window a tick at `now` queries, per
/// §4.6's determinism contract.
pub fn window(now: DateTime<Utc>, period: Duration, offset: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    let stop = now - offset;
    let start = stop - period;
    (start, stop)
}

fn result_to_batches(response: QueryResponse, options: &QueryOptions, t_max: DateTime<Utc>) -> Vec<Batch> {
    response
        .groups
        .into_iter()
        .map(|g| {
            let group = GroupId::derive(&options.measurement, &options.dimensions, &g.tags);
            let header = BatchHeader {
                name: options.measurement.clone(),
                group,
                tags: g.tags,
                dimensions: options.dimensions.clone(),
                t_max,
                by_name: false,
            };
            Batch { header, points: g.points }
        })
        .collect()
}

async fn forward_batch(outs: &[EdgeSender], batch: &Batch) -> Result<()> {
    for out in outs {
        out.collect_batch(batch.header.clone(), batch.points.clone()).await?;
    }
    Ok(())
}

pub fn spawn(
    name: impl Into<String>,
    outs: Vec<EdgeSender>,
    options: QueryOptions,
    template: QueryTemplate,
    ticker: Ticker,
    client: impl QueryClient,
) -> NodeHandle {
    let client: std::sync::Arc<dyn QueryClient> = std::sync::Arc::new(client);
    node::spawn(Node {
        name: name.into(),
        ins: vec![],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options, template, ticker, client),
    })
}

async fn run(
    mut ctx: NodeContext,
    options: QueryOptions,
    template: QueryTemplate,
    mut ticker: Ticker,
    client: std::sync::Arc<dyn QueryClient>,
) -> Result<()> {
    loop {
        let now = tokio::select! {
            biased;
            _ = ctx.abort.wait() => break,
            tick = ticker.next() => match tick {
                Some(t) => t,
                None => break,
            },
        };
        let (start, stop) = window(now, options.period, options.offset);
        let command = template(start, stop);
        match client.query(&command).await {
            Ok(response) => {
                for batch in result_to_batches(response, &options, stop) {
                    forward_batch(&ctx.outs, &batch).await?;
                }
            }
            Err(err) => ctx.record_error(&EngineError::Query(err)),
        }
    }
    ticker.stop().await;
    ctx.close_outs();
    Ok(())
}
