use std::{fmt, time::Duration};

use comms::transport::Payload;
use nanoid::nanoid;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::CancellationToken;

/// Unique identity of a single connection, used to find it again on departure
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        ConnectionId(nanoid!())
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        ConnectionId(String::from(value))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a payload could not be handed to a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The member is not keeping up with the room, its outbound queue stayed full
    #[error("outbound queue stayed full")]
    Lagging,
    /// The member's writer is gone, the connection is already dead
    #[error("outbound queue is closed")]
    Disconnected,
}

#[derive(Debug, Clone)]
/// [MemberHandle] is what a room keeps for each of its members.
///
/// It allows the room to hand payloads to the member's writer without touching the
/// member's socket, and to ask the member's session to end when it stops keeping up.
pub struct MemberHandle {
    /// Identity of the connection this handle belongs to
    connection_id: ConnectionId,
    /// Bounded queue drained by the connection's writer task
    outbound_tx: mpsc::Sender<Payload>,
    /// Cancelling this token ends the member's session
    close_token: CancellationToken,
}

impl MemberHandle {
    pub fn new(
        connection_id: ConnectionId,
        outbound_tx: mpsc::Sender<Payload>,
        close_token: CancellationToken,
    ) -> Self {
        MemberHandle {
            connection_id,
            outbound_tx,
            close_token,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Queue a payload for the member.
    ///
    /// If the queue is full, waits up to `grace` for the member's writer to make room.
    pub async fn deliver(&self, payload: Payload, grace: Duration) -> Result<(), DeliveryError> {
        self.outbound_tx
            .send_timeout(payload, grace)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => DeliveryError::Lagging,
                SendTimeoutError::Closed(_) => DeliveryError::Disconnected,
            })
    }

    /// Ask the member's session to end, it will depart on its own
    pub fn evict(&self) {
        self.close_token.cancel();
    }

    pub fn is_evicted(&self) -> bool {
        self.close_token.is_cancelled()
    }
}
