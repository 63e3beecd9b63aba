//! The UDF node (§4.8): drives the handshake, forwards stream/batch
//! traffic across a [`Transport`] to a peer process or socket, and
//! enforces the keepalive watchdog.

use super::protocol::{OptionValue, Request, Response, WireBatchHeader, WireFields, WirePoint};
use super::transport::Transport;
use crate::edge::{EdgeReceiver, EdgeSender};
use crate::error::{EngineError, Result};
use crate::model::batch::BatchHeader;
use crate::model::group::{Dimensions, GroupId};
use crate::model::message::Message;
use crate::model::point::Point;
use crate::node::{self, Node, NodeContext, NodeHandle};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::process::Child;

#[derive(Clone)]
pub struct UdfOptions {
    pub database: String,
    pub retention_policy: String,
    pub measurement: String,
    pub dimensions: Dimensions,
    pub init_options: BTreeMap<String, OptionValue>,
    /// A previously captured snapshot to hand the peer at startup, if any.
    pub restore: Option<Vec<u8>>,
    /// Keepalive round-trip budget. `<= 0` disables both the keepalive
    /// sender and the watchdog.
    pub timeout: Duration,
}

fn to_wire_point(p: &Point) -> WirePoint {
    WirePoint {
        time_unix_nanos: p.time.timestamp_nanos_opt().unwrap_or_default(),
        tags: p.tags.clone(),
        fields: WireFields::from_fields(&p.fields),
        group: p.group().as_str().to_string(),
    }
}

fn from_wire_point(w: WirePoint, options: &UdfOptions) -> Point {
    let time = DateTime::<Utc>::from_timestamp_nanos(w.time_unix_nanos);
    Point::new(
        options.database.clone(),
        options.retention_policy.clone(),
        options.measurement.clone(),
        time,
        w.tags,
        w.fields.into_fields(),
        options.dimensions.clone(),
    )
}

fn to_wire_header(h: &BatchHeader) -> WireBatchHeader {
    WireBatchHeader {
        name: h.name.clone(),
        group: h.group.as_str().to_string(),
        tags: h.tags.clone(),
        t_max_unix_nanos: h.t_max.timestamp_nanos_opt().unwrap_or_default(),
    }
}

fn from_wire_header(w: WireBatchHeader, options: &UdfOptions) -> BatchHeader {
    let group = GroupId::derive(&w.name, &options.dimensions, &w.tags);
    BatchHeader {
        name: w.name,
        group,
        tags: w.tags,
        dimensions: options.dimensions.clone(),
        t_max: DateTime::<Utc>::from_timestamp_nanos(w.t_max_unix_nanos),
        by_name: false,
    }
}

/// Spawn a UDF node. `child` is the peer process to kill after the abort
/// grace period, if the peer was started as a child process rather than
/// dialed as a socket.
pub fn spawn(name: impl Into<String>, ins: EdgeReceiver, outs: Vec<EdgeSender>, transport: Transport, options: UdfOptions, child: Option<Child>) -> NodeHandle {
    node::spawn(Node {
        name: name.into(),
        ins: vec![ins],
        outs,
        on_stop: None,
        make_run: move |ctx| run(ctx, transport, options, child),
    })
}

async fn handshake(transport: &mut Transport, options: &UdfOptions) -> Result<()> {
    transport.send(&Request::Info).await?;
    match transport.recv().await? {
        Some(Response::Info { .. }) => {}
        Some(other) => return Err(EngineError::Config(format!("udf peer sent {:?} before Info response", other))),
        None => return Err(EngineError::UdfServerStopped),
    }

    transport.send(&Request::Init { options: options.init_options.clone() }).await?;
    match transport.recv().await? {
        Some(Response::Init { success: true, .. }) => {}
        Some(Response::Init { success: false, error }) => {
            return Err(EngineError::Config(format!("udf init failed: {}", error.unwrap_or_default())))
        }
        Some(other) => return Err(EngineError::Config(format!("udf peer sent {:?} before Init response", other))),
        None => return Err(EngineError::UdfServerStopped),
    }

    if let Some(snapshot) = options.restore.clone() {
        transport.send(&Request::Restore { snapshot }).await?;
        match transport.recv().await? {
            Some(Response::Restore { success: true, .. }) => {}
            Some(Response::Restore { success: false, error }) => {
                return Err(EngineError::Config(format!("udf restore failed: {}", error.unwrap_or_default())))
            }
            Some(other) => return Err(EngineError::Config(format!("udf peer sent {:?} before Restore response", other))),
            None => return Err(EngineError::UdfServerStopped),
        }
    }
    Ok(())
}

async fn run(mut ctx: NodeContext, mut transport: Transport, options: UdfOptions, child: Option<Child>) -> Result<()> {
    if let Err(e) = handshake(&mut transport, &options).await {
        ctx.close_outs();
        return Err(e);
    }

    let watchdog_enabled = options.timeout > Duration::zero();
    let keepalive_period = if watchdog_enabled {
        (options.timeout / 2).to_std().unwrap_or(std::time::Duration::from_secs(1))
    } else {
        std::time::Duration::from_secs(3600)
    };
    let mut keepalive = tokio::time::interval(keepalive_period);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_seen = Instant::now();
    let mut input_done = false;

    let result = loop {
        if watchdog_enabled && last_seen.elapsed() > options.timeout.to_std().unwrap_or(std::time::Duration::MAX) {
            break Err(EngineError::UdfServerStopped);
        }
        tokio::select! {
            biased;
            _ = ctx.abort.wait() => break Err(EngineError::NodeAborted(ctx.name.clone())),
            _ = keepalive.tick(), if watchdog_enabled => {
                if transport.send(&Request::Keepalive { time_unix_nanos: Utc::now().timestamp_nanos_opt().unwrap_or_default() }).await.is_err() {
                    break Err(EngineError::UdfServerStopped);
                }
            }
            resp = transport.recv() => {
                last_seen = Instant::now();
                match resp {
                    Ok(Some(Response::Point(w))) => {
                        let p = from_wire_point(w, &options);
                        if let Err(e) = crate::ops::forward_all(&ctx.outs, Message::Point(p)).await {
                            break Err(e);
                        }
                    }
                    Ok(Some(Response::Begin(h))) => {
                        let header = from_wire_header(h, &options);
                        if let Err(e) = crate::ops::forward_all(&ctx.outs, Message::BeginBatch(header)).await {
                            break Err(e);
                        }
                    }
                    Ok(Some(Response::BatchPoint(w))) => {
                        let point = crate::model::batch::BatchPoint { time: DateTime::<Utc>::from_timestamp_nanos(w.time_unix_nanos), tags: w.tags, fields: w.fields.into_fields() };
                        if let Err(e) = crate::ops::forward_all(&ctx.outs, Message::BatchPoint(point)).await {
                            break Err(e);
                        }
                    }
                    Ok(Some(Response::End(h))) => {
                        let header = from_wire_header(h, &options);
                        if let Err(e) = crate::ops::forward_all(&ctx.outs, Message::EndBatch(header)).await {
                            break Err(e);
                        }
                    }
                    Ok(Some(Response::Keepalive { .. })) => {}
                    Ok(Some(Response::Error { message })) => ctx.record_error(&EngineError::data(&ctx.name, message)),
                    Ok(Some(other)) => ctx.record_error(&EngineError::data(&ctx.name, format!("unexpected udf response {:?}", other))),
                    Ok(None) => break Err(EngineError::UdfServerStopped),
                    Err(e) => break Err(e),
                }
            }
            msg = ctx.ins[0].next(), if !input_done => {
                match msg {
                    Some(Message::Point(p)) => {
                        if transport.send(&Request::Point(to_wire_point(&p))).await.is_err() {
                            break Err(EngineError::UdfServerStopped);
                        }
                    }
                    Some(Message::BeginBatch(h)) => {
                        if transport.send(&Request::Begin(to_wire_header(&h))).await.is_err() {
                            break Err(EngineError::UdfServerStopped);
                        }
                    }
                    Some(Message::BatchPoint(p)) => {
                        let w = WirePoint { time_unix_nanos: p.time.timestamp_nanos_opt().unwrap_or_default(), tags: p.tags, fields: WireFields::from_fields(&p.fields), group: String::new() };
                        if transport.send(&Request::BatchPoint(w)).await.is_err() {
                            break Err(EngineError::UdfServerStopped);
                        }
                    }
                    Some(Message::EndBatch(h)) => {
                        if transport.send(&Request::End(to_wire_header(&h))).await.is_err() {
                            break Err(EngineError::UdfServerStopped);
                        }
                    }
                    Some(Message::Barrier(_)) | Some(Message::DeleteGroup(_)) => {}
                    Some(Message::BufferedBatch(_)) => {}
                    Some(Message::Done) | None => {
                        input_done = true;
                    }
                }
            }
        }
    };

    ctx.drain_ins().await;
    ctx.close_outs();
    drop(child);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{self, EdgeConfig, EdgeKind};
    use crate::model::point::FieldValue;
    use tokio::io::duplex;

    /// A trivial in-process peer that answers the handshake and echoes
    /// every point it receives straight back.
    async fn run_echo_peer(io: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static) {
        let (read, write) = tokio::io::split(io);
        let mut peer = PeerTransport::from_io(read, write);
        assert_eq!(peer.recv_request().await, Request::Info);
        peer.send_response(&Response::Info { wants: super::super::protocol::EdgeKind::Stream, provides: super::super::protocol::EdgeKind::Stream, options: vec![] }).await;
        assert!(matches!(peer.recv_request().await, Request::Init { .. }));
        peer.send_response(&Response::Init { success: true, error: None }).await;
        loop {
            match peer.try_recv_request().await {
                Some(Request::Point(w)) => peer.send_response(&Response::Point(w)).await,
                Some(_) => {}
                None => return,
            }
        }
    }

    /// Minimal peer-side transport built directly on the codec, so the
    /// test doesn't need the node's own `Transport`, which only speaks
    /// the engine-to-peer direction.
    struct PeerTransport<R, W> {
        rx: tokio_util::codec::FramedRead<R, tokio_util::codec::LengthDelimitedCodec>,
        tx: tokio_util::codec::FramedWrite<W, tokio_util::codec::LengthDelimitedCodec>,
    }

    impl<R: tokio::io::AsyncRead + Unpin, W: tokio::io::AsyncWrite + Unpin> PeerTransport<R, W> {
        fn from_io(r: R, w: W) -> Self {
            PeerTransport {
                rx: tokio_util::codec::FramedRead::new(r, tokio_util::codec::LengthDelimitedCodec::new()),
                tx: tokio_util::codec::FramedWrite::new(w, tokio_util::codec::LengthDelimitedCodec::new()),
            }
        }

        async fn recv_request(&mut self) -> Request {
            use futures::StreamExt;
            let frame = self.rx.next().await.unwrap().unwrap();
            bincode::deserialize(&frame).unwrap()
        }

        async fn try_recv_request(&mut self) -> Option<Request> {
            use futures::StreamExt;
            let frame = self.rx.next().await?.ok()?;
            bincode::deserialize(&frame).ok()
        }

        async fn send_response(&mut self, resp: &Response) {
            use futures::SinkExt;
            let bytes = bincode::serialize(resp).unwrap();
            self.tx.send(bytes::Bytes::from(bytes)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn a_point_sent_through_an_echoing_peer_comes_back_out() {
        let (engine_io, peer_io) = duplex(8192);
        let (engine_read, engine_write) = tokio::io::split(engine_io);
        let transport = Transport::from_io(engine_read, engine_write);
        let peer_task = tokio::spawn(run_echo_peer(peer_io));

        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, mut out_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let options = UdfOptions {
            database: "db".into(),
            retention_policy: "autogen".into(),
            measurement: "cpu".into(),
            dimensions: Dimensions::default(),
            init_options: BTreeMap::new(),
            restore: None,
            timeout: Duration::zero(),
        };
        let handle = spawn("udf", src_rx, vec![out_tx], transport, options, None);

        let p = Point::new("db", "autogen", "cpu", Utc::now(), BTreeMap::new(), BTreeMap::from([("value".to_string(), FieldValue::Float(1.5))]), Dimensions::default());
        src_tx.collect_point(p.clone()).await.unwrap();
        src_tx.close();

        let Message::Point(echoed) = out_rx.next().await.unwrap() else { panic!("expected a point") };
        assert_eq!(echoed.fields.get("value"), p.fields.get("value"));

        handle.abort();
        handle.join().await.unwrap();
        peer_task.abort();
    }

    /// Scenario 6: a peer that answers the handshake and then never sends
    /// another message trips the watchdog once `timeout` elapses, rather
    /// than hanging the node forever.
    #[tokio::test]
    async fn a_peer_that_stops_responding_trips_the_keepalive_watchdog() {
        let (engine_io, peer_io) = duplex(8192);
        let (engine_read, engine_write) = tokio::io::split(engine_io);
        let transport = Transport::from_io(engine_read, engine_write);
        let peer_task = tokio::spawn(async move {
            let (read, write) = tokio::io::split(peer_io);
            let mut peer = PeerTransport::from_io(read, write);
            assert_eq!(peer.recv_request().await, Request::Info);
            peer.send_response(&Response::Info { wants: super::super::protocol::EdgeKind::Stream, provides: super::super::protocol::EdgeKind::Stream, options: vec![] }).await;
            assert!(matches!(peer.recv_request().await, Request::Init { .. }));
            peer.send_response(&Response::Init { success: true, error: None }).await;
            // Go silent: never answer the keepalive the node will send.
            std::future::pending::<()>().await;
        });

        let (src_tx, src_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let (out_tx, _out_rx) = edge::channel(EdgeKind::Stream, EdgeConfig::default());
        let options = UdfOptions {
            database: "db".into(),
            retention_policy: "autogen".into(),
            measurement: "cpu".into(),
            dimensions: Dimensions::default(),
            init_options: BTreeMap::new(),
            restore: None,
            timeout: Duration::milliseconds(100),
        };
        let handle = spawn("udf", src_rx, vec![out_tx], transport, options, None);

        let err = tokio::time::timeout(std::time::Duration::from_secs(5), handle.join())
            .await
            .expect("watchdog should abort the node well within the test timeout")
            .unwrap_err();
        assert!(matches!(err, EngineError::UdfServerStopped));

        src_tx.close();
        peer_task.abort();
    }
}
