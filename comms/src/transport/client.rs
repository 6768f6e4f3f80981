use anyhow::Context;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::room_key::RoomKey;

use super::{common, BoxedStream, Frame, FrameWriter};

/// [FrameStream] is a stream of [Frame]s relayed by the server from the other room members
///
/// # Cancel Safety
///
/// This stream is cancel-safe, meaning that it can be used in [tokio::select!]
/// without the risk of missing frames.
pub type FrameStream = BoxedStream<anyhow::Result<Frame>>;

/// [FrameWriter] for a client connection
pub type ClientWriter = FrameWriter<MaybeTlsStream<TcpStream>>;

/// Builds the url of a room, e.g. `ws://localhost:8000/ws/algebra-101`
///
/// # Arguments
///
/// - `server_url` - Scheme and authority of the relay, e.g. `ws://localhost:8000`
/// - `base_path` - The path rooms are served under, e.g. `/ws`
/// - `room_key` - The room to join
pub fn room_url(server_url: &str, base_path: &str, room_key: &RoomKey) -> String {
    format!(
        "{}{}",
        server_url.trim_end_matches('/'),
        room_key.to_path(base_path)
    )
}

/// Connects to a room and splits the connection into a stream of frames and a writer.
///
/// The room is joined as soon as this returns.
///
/// # Arguments
///
/// - `url` - The full room url, see [room_url]
pub async fn connect(url: &str) -> anyhow::Result<(FrameStream, ClientWriter)> {
    let (websocket, _) = connect_async(url)
        .await
        .with_context(|| format!("could not connect to '{url}'"))?;

    Ok(common::split_websocket(websocket))
}
