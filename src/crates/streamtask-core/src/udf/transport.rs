//! Wire framing and the two peer kinds a UDF node can own: a child
//! process's stdio, or a Unix domain socket (§4.8). Framing is
//! length-delimited; bodies are bincode-encoded [`Request`]/[`Response`]
//! values, mirroring `streamtask-checkpoint`'s own `BincodeSerializer`.

use super::protocol::{Request, Response};
use crate::error::{EngineError, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// A framed, bincode-encoded duplex connection to a UDF peer.
pub struct Transport {
    tx: FramedWrite<BoxedWriter, LengthDelimitedCodec>,
    rx: FramedRead<BoxedReader, LengthDelimitedCodec>,
}

impl Transport {
    pub(crate) fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let boxed_reader: BoxedReader = Box::new(reader);
        let boxed_writer: BoxedWriter = Box::new(writer);
        Transport {
            tx: FramedWrite::new(boxed_writer, LengthDelimitedCodec::new()),
            rx: FramedRead::new(boxed_reader, LengthDelimitedCodec::new()),
        }
    }

    /// Spawn `program` with piped stdio and frame its stdin/stdout. The
    /// caller keeps the returned [`Child`] so it can kill the peer on
    /// abort after the grace period.
    pub async fn spawn_process(program: &str, args: &[String]) -> Result<(Transport, Child)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(EngineError::Io)?;
        let stdin = child.stdin.take().ok_or_else(|| EngineError::Config("udf process has no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| EngineError::Config("udf process has no stdout".into()))?;
        Ok((Transport::from_io(stdout, stdin), child))
    }

    /// Connect to a peer listening on a Unix domain socket.
    pub async fn connect_unix(path: impl AsRef<Path>) -> Result<Transport> {
        let stream = UnixStream::connect(path).await.map_err(EngineError::Io)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Transport::from_io(read_half, write_half))
    }

    pub async fn send(&mut self, req: &Request) -> Result<()> {
        let bytes = bincode::serialize(req)?;
        self.tx.send(Bytes::from(bytes)).await.map_err(EngineError::Io)
    }

    /// Read the next response frame. `None` means the peer closed its
    /// write side.
    pub async fn recv(&mut self) -> Result<Option<Response>> {
        match self.rx.next().await {
            None => Ok(None),
            Some(frame) => {
                let frame = frame.map_err(EngineError::Io)?;
                let response: Response = bincode::deserialize(&frame)?;
                Ok(Some(response))
            }
        }
    }
}
