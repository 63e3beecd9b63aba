//! The autoscale cooldown state machine (§4.7), shared by the K8s and
//! Swarm nodes. Concrete orchestrator clients are out of scope — this
//! module only defines the [`Scaler`] boundary and the clamp/cooldown
//! logic that sits in front of it.

use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::{EngineError, Result};
use crate::eval::{eval, fill_scope, CallState, CompiledExpr, Scope, Value};
use crate::model::group::Dimensions;
use crate::model::message::Message;
use crate::model::point::{FieldValue, Point};
use crate::node::{self, Node, NodeContext, NodeHandle};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};

/// The external orchestrator boundary. `get` seeds `current` for a
/// resource this node has not seen before; `update` commits a change.
#[async_trait]
pub trait Scaler: Send + Sync + 'static {
    async fn get(&self, resource: &str) -> std::result::Result<i64, String>;
    async fn update(&self, resource: &str, replicas: i64) -> std::result::Result<(), String>;
}

#[derive(Clone)]
pub struct AutoscaleOptions {
    pub database: String,
    pub retention_policy: String,
    pub event_measurement: String,
    /// The tag naming the resource to scale.
    pub resource_tag: String,
    pub replicas_expr: CompiledExpr,
    pub min: i64,
    pub max: i64,
    pub increase_cooldown: Duration,
    pub decrease_cooldown: Duration,
}

struct ResourceState {
    current: i64,
    last_increase: Option<DateTime<Utc>>,
    last_decrease: Option<DateTime<Utc>>,
}

pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, outs: Vec<EdgeSender>, options: AutoscaleOptions, scaler: impl Scaler) -> NodeHandle {
    let scaler: std::sync::Arc<dyn Scaler> = std::sync::Arc::new(scaler);
    node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, options, scaler),
    })
}

fn eval_replicas(expr: &CompiledExpr, current: i64, p: &Point, scope: &mut Scope, calls: &mut CallState) -> Result<i64> {
    let field_refs: Vec<String> = expr.refs.iter().filter(|r| r.as_str() != "current").cloned().collect();
    fill_scope(scope, &field_refs, p.time, &p.fields, &p.tags)?;
    if expr.refs.iter().any(|r| r == "current") {
        scope.insert("current".into(), Value::Int(current));
    }
    let v = eval(&expr.expr, scope, calls)?;
    match v {
        Value::Int(i) => Ok(i),
        Value::Float(f) => Ok(f as i64),
        other => Err(EngineError::data("autoscale", format!("replicas lambda must yield a number, got {}", other.type_name()))),
    }
}

async fn run(mut ctx: NodeContext, options: AutoscaleOptions, scaler: std::sync::Arc<dyn Scaler>) -> Result<()> {
    let mut states: HashMap<String, ResourceState> = HashMap::new();
    let mut scope = Scope::with_capacity(options.replicas_expr.refs.len());
    let mut calls = CallState::default();

    while let Some(msg) = ctx.ins[0].next().await {
        let p = match msg {
            Message::Point(p) => p,
            other => {
                super::forward_all(&ctx.outs, other).await?;
                continue;
            }
        };
        let Some(resource) = p.tags.get(&options.resource_tag).cloned() else {
            ctx.record_error(&EngineError::data("autoscale", format!("point missing resource tag '{}'", options.resource_tag)));
            continue;
        };

        if !states.contains_key(&resource) {
            match scaler.get(&resource).await {
                Ok(current) => {
                    states.insert(resource.clone(), ResourceState { current, last_increase: None, last_decrease: None });
                }
                Err(err) => {
                    ctx.record_error(&EngineError::external("scaler", err));
                    continue;
                }
            }
        }
        let current = states[&resource].current;

        let new_replicas = match eval_replicas(&options.replicas_expr, current, &p, &mut scope, &mut calls) {
            Ok(n) => n.clamp(options.min, options.max),
            Err(e) => {
                ctx.record_error(&e);
                continue;
            }
        };
        if new_replicas == current {
            continue;
        }

        let state = states.get_mut(&resource).unwrap();
        if new_replicas > current {
            if let Some(last) = state.last_increase {
                if p.time < last + options.increase_cooldown {
                    continue;
                }
            }
        } else if let Some(last) = state.last_decrease {
            if p.time < last + options.decrease_cooldown {
                continue;
            }
        }

        match scaler.update(&resource, new_replicas).await {
            Ok(()) => {
                let old = state.current;
                state.current = new_replicas;
                if new_replicas > old {
                    state.last_increase = Some(p.time);
                } else {
                    state.last_decrease = Some(p.time);
                }
                let fields = BTreeMap::from([
                    ("old".to_string(), FieldValue::Int(old)),
                    ("new".to_string(), FieldValue::Int(new_replicas)),
                ]);
                let tags = BTreeMap::from([(options.resource_tag.clone(), resource.clone())]);
                let event = Point::new(
                    options.database.clone(),
                    options.retention_policy.clone(),
                    options.event_measurement.clone(),
                    p.time,
                    tags,
                    fields,
                    Dimensions::new(vec![options.resource_tag.clone()], false),
                );
                super::forward_all(&ctx.outs, Message::Point(event)).await?;
            }
            Err(err) => {
                ctx.record_error(&EngineError::external("scaler", err));
            }
        }
    }
    ctx.close_outs();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{self, EdgeConfig, EdgeKind};
    use crate::eval::{BinaryOp, Expr, LitValue};
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn point(t: DateTime<Utc>, resource: &str, cpu: i64) -> Point {
        Point::new(
            "db", "autogen", "load", t,
            BTreeMap::from([("resource".to_string(), resource.to_string())]),
            BTreeMap::from([("cpu".to_string(), FieldValue::Int(cpu))]),
            Dimensions::default(),
        )
    }

    struct FakeScaler {
        initial: i64,
        updates: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Scaler for std::sync::Arc<FakeScaler> {
        async fn get(&self, _resource: &str) -> std::result::Result<i64, String> {
            Ok(self.initial)
        }
        async fn update(&self, _resource: &str, replicas: i64) -> std::result::Result<(), String> {
            self.updates.lock().unwrap().push(replicas);
            Ok(())
        }
    }

    fn replicas_is_current_plus_one() -> CompiledExpr {
        CompiledExpr::new(
            "replicas",
            Expr::Binary(BinaryOp::Add, Box::new(Expr::Ref("current".into())), Box::new(Expr::Lit(LitValue::Int(1)))),
            vec!["current".into()],
        )
    }

    #[tokio::test]
    async fn scales_up_and_emits_an_event_point() {
        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let scaler = std::sync::Arc::new(FakeScaler { initial: 2, updates: Mutex::new(vec![]) });
        let options = AutoscaleOptions {
            database: "db".into(),
            retention_policy: "autogen".into(),
            event_measurement: "scale_events".into(),
            resource_tag: "resource".into(),
            replicas_expr: replicas_is_current_plus_one(),
            min: 1,
            max: 10,
            increase_cooldown: Duration::seconds(60),
            decrease_cooldown: Duration::seconds(60),
        };
        let handle = spawn("autoscale", src_rx, vec![out_tx], options, scaler.clone());

        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        src_tx.collect_point(point(t0, "web", 90)).await.unwrap();
        src_tx.close();

        let Message::Point(event) = out_rx.next().await.unwrap() else { panic!() };
        assert!(matches!(event.fields.get("old"), Some(FieldValue::Int(2))));
        assert!(matches!(event.fields.get("new"), Some(FieldValue::Int(3))));
        assert_eq!(*scaler.updates.lock().unwrap(), vec![3]);
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn a_second_increase_within_the_cooldown_window_is_dropped() {
        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let scaler = std::sync::Arc::new(FakeScaler { initial: 2, updates: Mutex::new(vec![]) });
        let options = AutoscaleOptions {
            database: "db".into(),
            retention_policy: "autogen".into(),
            event_measurement: "scale_events".into(),
            resource_tag: "resource".into(),
            replicas_expr: replicas_is_current_plus_one(),
            min: 1,
            max: 10,
            increase_cooldown: Duration::seconds(60),
            decrease_cooldown: Duration::seconds(60),
        };
        let handle = spawn("autoscale", src_rx, vec![out_tx], options, scaler.clone());

        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        src_tx.collect_point(point(t0, "web", 90)).await.unwrap();
        src_tx.collect_point(point(t0 + Duration::seconds(5), "web", 95)).await.unwrap();
        src_tx.close();

        assert!(out_rx.next().await.is_some());
        assert!(out_rx.next().await.is_none());
        assert_eq!(*scaler.updates.lock().unwrap(), vec![3]);
        handle.join().await.unwrap();
    }
}
