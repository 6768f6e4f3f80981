use std::pin::Pin;

use anyhow::Context;
use bytes::Bytes;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_stream::Stream;
use tokio_tungstenite::{
    tungstenite::{protocol::CloseFrame, Message},
    WebSocketStream,
};

use super::Frame;

pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// Maps a raw websocket message into the relay's view of it
fn into_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(data) => Frame::Binary(data),
        Message::Close(frame) => Frame::Close(frame.map(|frame| String::from(frame.reason.as_str()))),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Frame::KeepAlive,
    }
}

/// [FrameWriter] is the write half of a websocket connection
pub struct FrameWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> FrameWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(super) fn new(sink: SplitSink<WebSocketStream<S>, Message>) -> Self {
        Self { sink }
    }

    /// Send a text payload to the backing websocket
    ///
    /// # Cancel Safety
    ///
    /// This method is not cancellation safe. If it is used as the event
    /// in a [tokio::select!] statement and some other
    /// branch completes first, the message may have been partially written
    /// and the connection should be considered broken.
    pub async fn write_text(&mut self, payload: super::Payload) -> anyhow::Result<()> {
        self.sink
            .send(Message::Text(payload))
            .await
            .context("could not write text frame to the websocket")
    }

    /// Send a ping, the relay pings its connections and clients may ping to stay active
    pub async fn ping(&mut self) -> anyhow::Result<()> {
        self.sink
            .send(Message::Ping(Bytes::new()))
            .await
            .context("could not write ping frame to the websocket")
    }

    /// Start the closing handshake, a close frame with the given reason is sent if possible
    pub async fn close(&mut self, reason: Option<CloseFrame>) -> anyhow::Result<()> {
        if let Some(reason) = reason {
            // the peer may already be gone, in which case the close below reports it
            let _ = self.sink.send(Message::Close(Some(reason))).await;
        }

        self.sink
            .close()
            .await
            .context("could not close the websocket")
    }
}

/// Splits a websocket into a stream of [Frame]s and a [FrameWriter]
pub(super) fn split_websocket<S>(
    websocket: WebSocketStream<S>,
) -> (BoxedStream<anyhow::Result<Frame>>, FrameWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = websocket.split();

    (
        Box::pin(stream.map(|message| {
            message
                .map(into_frame)
                .context("could not read frame from the websocket")
        })),
        FrameWriter::new(sink),
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio_tungstenite::tungstenite::{protocol::frame::coding::CloseCode, Utf8Bytes};

    use super::*;

    #[test]
    fn test_text_messages_are_passed_through() {
        assert_eq!(
            into_frame(Message::Text(Utf8Bytes::from_static("hello"))),
            Frame::Text(Utf8Bytes::from_static("hello"))
        );
    }

    #[test]
    fn test_control_messages_are_keep_alives() {
        assert_eq!(into_frame(Message::Ping(Bytes::new())), Frame::KeepAlive);
        assert_eq!(into_frame(Message::Pong(Bytes::new())), Frame::KeepAlive);
    }

    #[test]
    fn test_close_message_keeps_reason() {
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: Utf8Bytes::from_static("bye"),
        }));

        assert_eq!(into_frame(close), Frame::Close(Some(String::from("bye"))));
        assert_eq!(into_frame(Message::Close(None)), Frame::Close(None));
    }
}
