use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use comms::transport::{
    self,
    server::{AcceptConfig, AcceptedConnection},
};
use tokio::{net::TcpStream, sync::broadcast};

use crate::{config::RelayConfig, room_manager::RoomManager};

use self::connection_session::ConnectionSession;

mod connection_session;

/// Per connection settings, shared by every session of a relay
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub accept: AcceptConfig,
    pub outbound_queue_capacity: usize,
    pub idle_timeout: Duration,
    pub send_timeout: Duration,
    pub ping_interval: Duration,
}

impl From<&RelayConfig> for SessionConfig {
    fn from(config: &RelayConfig) -> Self {
        SessionConfig {
            accept: config.accept_config(),
            outbound_queue_capacity: config.outbound_queue_capacity,
            idle_timeout: config.idle_timeout(),
            send_timeout: config.send_timeout(),
            ping_interval: config.ping_interval(),
        }
    }
}

/// Given a tcp stream and a room manager, handles the connection
/// from the websocket handshake until the connection has departed its room.
///
/// A connection which fails the handshake never touches the room manager and is reported as an error.
/// Everything after the handshake, including transport errors, ends in departure and is not an error.
pub async fn handle_connection(
    room_manager: Arc<RoomManager>,
    config: Arc<SessionConfig>,
    quit_rx: broadcast::Receiver<()>,
    stream: TcpStream,
    peer_addr: SocketAddr,
) -> anyhow::Result<()> {
    let AcceptedConnection {
        room_key,
        frames,
        writer,
    } = transport::server::accept(stream, &config.accept)
        .await
        .with_context(|| format!("rejected connection from {}", peer_addr))?;

    let session = ConnectionSession::join(room_manager, &config, room_key, writer);

    log::debug!(
        "connection {} from {} joined room '{}'",
        session.connection_id(),
        peer_addr,
        session.room_key()
    );

    session.run(frames, quit_rx).await;

    Ok(())
}
