use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        self,
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        protocol::WebSocketConfig,
    },
};

use crate::room_key::{RoomKey, RoomKeyError};

use super::{common, BoxedStream, Frame, FrameWriter};

/// [FrameStream] is a stream of [Frame]s sent by the client
///
/// # Cancel Safety
///
/// This stream is cancel-safe, meaning that it can be used in [tokio::select!]
/// without the risk of missing frames.
pub type FrameStream = BoxedStream<anyhow::Result<Frame>>;

/// How incoming connections are accepted
#[derive(Debug, Clone)]
pub struct AcceptConfig {
    /// Rooms are served under `<base_path>/<room key>`
    pub base_path: String,
    /// Largest text message a client may send, in bytes
    pub max_message_size: usize,
    /// How long the client has to complete the websocket handshake
    pub handshake_timeout: Duration,
}

impl Default for AcceptConfig {
    fn default() -> Self {
        AcceptConfig {
            base_path: String::from("/ws"),
            max_message_size: 1024 * 1024,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Reasons an incoming connection did not make it to a room
#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("handshake did not complete within {0:?}")]
    Timeout(Duration),
    #[error("connection target rejected: {0}")]
    InvalidTarget(#[from] RoomKeyError),
    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),
}

/// A connection which completed the handshake and named the room it wants to join
pub struct AcceptedConnection {
    pub room_key: RoomKey,
    pub frames: FrameStream,
    pub writer: FrameWriter<TcpStream>,
}

fn reject(status: StatusCode, reason: &RoomKeyError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;

    response
}

/// Performs the websocket handshake on a raw TCP stream,
/// extracting the room key from the request path.
///
/// Requests outside of the base path are answered with `404 Not Found`,
/// malformed room keys with `400 Bad Request`.
///
/// # Arguments
///
/// - `stream` - A freshly accepted [TcpStream]
/// - `config` - Path and size limits to enforce
pub async fn accept(
    stream: TcpStream,
    config: &AcceptConfig,
) -> Result<AcceptedConnection, AcceptError> {
    let mut target: Option<Result<RoomKey, RoomKeyError>> = None;

    let callback = |request: &Request, response: Response| {
        let room_key = RoomKey::from_path(request.uri().path(), &config.base_path);
        let outcome = match &room_key {
            Ok(_) => Ok(response),
            Err(err @ RoomKeyError::OutsideBasePath { .. }) => {
                Err(reject(StatusCode::NOT_FOUND, err))
            }
            Err(err) => Err(reject(StatusCode::BAD_REQUEST, err)),
        };

        target = Some(room_key);
        outcome
    };

    let websocket_config = WebSocketConfig::default()
        .max_message_size(Some(config.max_message_size))
        .max_frame_size(Some(config.max_message_size));

    let handshake = accept_hdr_async_with_config(stream, callback, Some(websocket_config));
    let handshake = tokio::time::timeout(config.handshake_timeout, handshake).await;
    let websocket = match handshake {
        Err(_) => return Err(AcceptError::Timeout(config.handshake_timeout)),
        Ok(Ok(websocket)) => websocket,
        Ok(Err(err)) => {
            // a rejected target is reported as such rather than as the http error tungstenite returns
            return Err(match target {
                Some(Err(reason)) => AcceptError::InvalidTarget(reason),
                _ => AcceptError::Handshake(err),
            });
        }
    };

    // the callback always runs before a handshake can succeed
    let room_key = target.unwrap_or(Err(RoomKeyError::Empty))?;

    log::trace!("websocket handshake completed for room '{room_key}'");

    let (frames, writer) = common::split_websocket(websocket);

    Ok(AcceptedConnection {
        room_key,
        frames,
        writer,
    })
}
