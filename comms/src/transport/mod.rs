#[cfg(any(feature = "client", feature = "server"))]
use bytes::Bytes;
#[cfg(any(feature = "client", feature = "server"))]
pub use tokio_tungstenite::tungstenite::{
    protocol::{frame::coding::CloseCode, CloseFrame},
    Utf8Bytes as Payload,
};

/// Transport over WebSocket implementation for a client to be able to join a room
#[cfg(feature = "client")]
pub mod client;
#[cfg(any(feature = "client", feature = "server"))]
mod common;
/// Transport over WebSocket implementation for a server to accept a single room connection
#[cfg(feature = "server")]
pub mod server;

#[cfg(any(feature = "client", feature = "server"))]
pub use self::common::{BoxedStream, FrameWriter};

/// A single frame read from a websocket, as far as the relay cares about it
#[cfg(any(feature = "client", feature = "server"))]
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// An opaque text message, the only thing which is relayed
    Text(Payload),
    /// Binary messages are not relayed
    Binary(Bytes),
    /// Ping or pong, proves the peer is still there
    KeepAlive,
    /// The peer started the closing handshake, with the reason if it gave one
    Close(Option<String>),
}
