//! The UDF transport (§4.8): a node that owns a peer process or socket
//! speaking a length-delimited, bincode-encoded protocol, with a
//! handshake, a keepalive watchdog, and stream/batch data framing.

pub mod node;
pub mod protocol;
pub mod transport;

pub use node::{spawn, UdfOptions};
pub use protocol::{OptionValue, Request, Response};
pub use transport::Transport;
