use std::{fmt, sync::Arc, time::Duration};

use comms::{
    transport::{server::FrameStream, CloseCode, CloseFrame, Frame, FrameWriter, Payload},
    RoomKey,
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::room_manager::{ConnectionId, MemberHandle, Membership, RoomManager};

use super::SessionConfig;

/// Why the writer of a connection gave up
#[derive(Debug)]
enum WriteFailure {
    TimedOut(Duration),
    Failed(anyhow::Error),
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteFailure::TimedOut(timeout) => write!(f, "write took longer than {:?}", timeout),
            WriteFailure::Failed(err) => write!(f, "write failed: {:#}", err),
        }
    }
}

/// Why a connection stopped receiving
#[derive(Debug)]
enum SessionEnd {
    /// The client started the closing handshake
    ClientClosed(Option<String>),
    /// The transport ended without a closing handshake
    StreamEnded,
    TransportError(anyhow::Error),
    IdleTimeout(Duration),
    /// The room gave up on the connection, it did not keep up with the broadcasts
    Evicted,
    /// Writing to the connection failed, it is not usable anymore
    WriteFailed(WriteFailure),
    ServerShutdown,
}

impl SessionEnd {
    /// The close frame the relay sends on its own, if any
    fn close_frame(&self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            SessionEnd::ClientClosed(_)
            | SessionEnd::StreamEnded
            | SessionEnd::TransportError(_)
            | SessionEnd::WriteFailed(_) => return None,
            SessionEnd::IdleTimeout(_) => (CloseCode::Policy, "idle timeout"),
            SessionEnd::Evicted => (CloseCode::Policy, "too slow"),
            SessionEnd::ServerShutdown => (CloseCode::Away, "server shutting down"),
        };

        Some(CloseFrame {
            code,
            reason: Payload::from_static(reason),
        })
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::ClientClosed(Some(reason)) => write!(f, "closed by client ({})", reason),
            SessionEnd::ClientClosed(None) => write!(f, "closed by client"),
            SessionEnd::StreamEnded => write!(f, "connection dropped"),
            SessionEnd::TransportError(err) => write!(f, "transport error: {:#}", err),
            SessionEnd::IdleTimeout(timeout) => write!(f, "idle for {:?}", timeout),
            SessionEnd::Evicted => write!(f, "evicted"),
            SessionEnd::WriteFailed(failure) => write!(f, "{}", failure),
            SessionEnd::ServerShutdown => write!(f, "server shutdown"),
        }
    }
}

/// [ConnectionSession] drives a single joined connection.
///
/// Frames read from the connection are broadcast to the room, while a separate writer task
/// drains the connection's outbound queue, so a slow socket only ever delays itself.
pub(super) struct ConnectionSession {
    membership: Membership,
    close_token: CancellationToken,
    writer_task: JoinHandle<(FrameWriter<TcpStream>, Option<WriteFailure>)>,
    idle_timeout: Duration,
    send_timeout: Duration,
}

impl ConnectionSession {
    /// Register the connection as a member of the room and start delivering broadcasts to it
    pub fn join(
        room_manager: Arc<RoomManager>,
        config: &SessionConfig,
        room_key: RoomKey,
        writer: FrameWriter<TcpStream>,
    ) -> Self {
        let close_token = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity);
        let member = MemberHandle::new(ConnectionId::generate(), outbound_tx, close_token.clone());

        let writer_task = tokio::spawn(forward_outbound(
            outbound_rx,
            writer,
            close_token.clone(),
            config.send_timeout,
            config.ping_interval,
        ));
        let membership = room_manager.join(room_key, member);

        ConnectionSession {
            membership,
            close_token,
            writer_task,
            idle_timeout: config.idle_timeout,
            send_timeout: config.send_timeout,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        self.membership.connection_id()
    }

    pub fn room_key(&self) -> &RoomKey {
        self.membership.room_key()
    }

    /// Relay frames until the connection ends, then depart the room.
    pub async fn run(self, mut frames: FrameStream, mut quit_rx: broadcast::Receiver<()>) {
        let end = self.receive(&mut frames, &mut quit_rx).await;

        self.depart(end).await;
    }

    async fn receive(
        &self,
        frames: &mut FrameStream,
        quit_rx: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                frame = tokio::time::timeout(self.idle_timeout, frames.next()) => match frame {
                    Err(_) => return SessionEnd::IdleTimeout(self.idle_timeout),
                    Ok(None) => return SessionEnd::StreamEnded,
                    Ok(Some(Err(err))) => return SessionEnd::TransportError(err),
                    Ok(Some(Ok(Frame::Close(reason)))) => return SessionEnd::ClientClosed(reason),
                    Ok(Some(Ok(Frame::Text(payload)))) => {
                        // waits while a peer's queue is full, which holds back further reads
                        let delivered = self.membership.broadcast(&payload).await;

                        log::trace!(
                            "relayed {} bytes from {} to {} member(s) of '{}'",
                            payload.len(),
                            self.connection_id(),
                            delivered,
                            self.room_key()
                        );
                    }
                    Ok(Some(Ok(Frame::Binary(data)))) => {
                        log::debug!(
                            "dropping {} byte binary message from {}, only text is relayed",
                            data.len(),
                            self.connection_id()
                        );
                    }
                    Ok(Some(Ok(Frame::KeepAlive))) => {}
                },
                // the room evicted the connection, or its writer gave up
                () = self.close_token.cancelled() => return SessionEnd::Evicted,
                // the server is shutting down, or is already gone
                _ = quit_rx.recv() => return SessionEnd::ServerShutdown,
            }
        }
    }

    /// Stop writing, leave the room, then close the connection.
    ///
    /// The writer is stopped first so nothing reaches the connection once it left the room.
    async fn depart(self, end: SessionEnd) {
        let ConnectionSession {
            membership,
            close_token,
            writer_task,
            send_timeout,
            ..
        } = self;

        close_token.cancel();
        let writer = writer_task.await;

        let connection_id = membership.connection_id().clone();
        let room_key = membership.room_key().clone();
        membership.leave();

        let (mut writer, end) = match writer {
            Ok((writer, Some(failure))) => (writer, SessionEnd::WriteFailed(failure)),
            Ok((writer, None)) => (writer, end),
            Err(err) => {
                log::error!("writer task of connection {} failed: {}", connection_id, err);
                return;
            }
        };

        match &end {
            SessionEnd::TransportError(_) | SessionEnd::Evicted | SessionEnd::WriteFailed(_) => {
                log::info!(
                    "connection {} departed room '{}': {}",
                    connection_id,
                    room_key,
                    end
                )
            }
            _ => log::debug!(
                "connection {} departed room '{}': {}",
                connection_id,
                room_key,
                end
            ),
        }

        if let SessionEnd::WriteFailed(_) = end {
            return;
        }

        match tokio::time::timeout(send_timeout, writer.close(end.close_frame())).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::trace!("could not close connection {}: {:#}", connection_id, err),
            Err(_) => log::trace!("closing connection {} timed out", connection_id),
        }
    }
}

enum Outbound {
    Text(Payload),
    Ping,
}

/// Writes queued payloads to the connection until the session stops it or a write fails.
///
/// The connection is also pinged every `ping_interval`, the client's pongs count as activity.
/// A failed or timed out write cancels the session, so the connection departs its room,
/// and is handed back together with the writer.
async fn forward_outbound(
    mut outbound_rx: mpsc::Receiver<Payload>,
    mut writer: FrameWriter<TcpStream>,
    close_token: CancellationToken,
    send_timeout: Duration,
    ping_interval: Duration,
) -> (FrameWriter<TcpStream>, Option<WriteFailure>) {
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let failure = loop {
        let outbound = tokio::select! {
            biased;
            () = close_token.cancelled() => break None,
            payload = outbound_rx.recv() => match payload {
                Some(payload) => Outbound::Text(payload),
                None => break None,
            },
            _ = ping.tick() => Outbound::Ping,
        };

        let write = async {
            match outbound {
                Outbound::Text(payload) => writer.write_text(payload).await,
                Outbound::Ping => writer.ping().await,
            }
        };

        // an evicted connection stops waiting on its socket right away
        let written = tokio::select! {
            biased;
            () = close_token.cancelled() => break None,
            written = tokio::time::timeout(send_timeout, write) => written,
        };

        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => break Some(WriteFailure::Failed(err)),
            Err(_) => break Some(WriteFailure::TimedOut(send_timeout)),
        }
    };

    if let Some(failure) = &failure {
        log::debug!("{}, closing the connection", failure);
        close_token.cancel();
    }

    (writer, failure)
}
