use comms::{
    transport::{
        self,
        server::{AcceptConfig, AcceptError},
        Frame, Payload,
    },
    RoomKey, RoomKeyError,
};
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("could not bind to an ephemeral port");
    let server_url = format!("ws://{}", listener.local_addr().unwrap());

    (listener, server_url)
}

#[tokio::test]
async fn assert_server_client_transport() {
    let (listener, server_url) = bind().await;
    let room_key = RoomKey::new("algebra-101").unwrap();
    let url = transport::client::room_url(&server_url, "/ws", &room_key);

    let server = tokio::spawn(async move {
        // accept the only client connection we will have
        let (tcp_stream, _addr) = listener.accept().await?;
        let mut connection =
            transport::server::accept(tcp_stream, &AcceptConfig::default()).await?;

        connection
            .writer
            .write_text(Payload::from(String::from("welcome")))
            .await?;

        // listen for frames from the client until the connection is closed
        let mut collected_frames = Vec::new();
        while let Some(frame) = connection.frames.next().await {
            match frame? {
                Frame::Close(_) => break,
                frame => collected_frames.push(frame),
            }
        }

        anyhow::Ok((connection.room_key, collected_frames))
    });

    let (mut frames, mut writer) = transport::client::connect(&url).await.unwrap();

    // read the welcome message from the server
    match frames.next().await {
        Some(Ok(Frame::Text(text))) => assert_eq!(text.as_str(), "welcome"),
        other => panic!("unexpected frame from the server: {:?}", other),
    }

    writer
        .write_text(Payload::from(String::from(r#"{"type":"chat","message":"hi"}"#)))
        .await
        .unwrap();
    writer.close(None).await.unwrap();

    let (accepted_room_key, collected_frames) = server.await.unwrap().unwrap();

    assert_eq!(accepted_room_key, room_key);
    assert_eq!(
        collected_frames,
        vec![Frame::Text(Payload::from(String::from(
            r#"{"type":"chat","message":"hi"}"#
        )))]
    );
}

#[tokio::test]
async fn assert_connection_outside_base_path_is_rejected() {
    let (listener, server_url) = bind().await;

    let server = tokio::spawn(async move {
        let (tcp_stream, _addr) = listener.accept().await.unwrap();

        transport::server::accept(tcp_stream, &AcceptConfig::default())
            .await
            .map(|connection| connection.room_key)
    });

    let client = transport::client::connect(&format!("{server_url}/rooms/r1")).await;

    assert!(client.is_err());
    assert!(matches!(
        server.await.unwrap(),
        Err(AcceptError::InvalidTarget(RoomKeyError::OutsideBasePath { .. }))
    ));
}

#[tokio::test]
async fn assert_stalled_handshake_times_out() {
    let (listener, server_url) = bind().await;
    let config = AcceptConfig {
        handshake_timeout: std::time::Duration::from_millis(100),
        ..AcceptConfig::default()
    };

    let server = tokio::spawn(async move {
        let (tcp_stream, _addr) = listener.accept().await.unwrap();

        transport::server::accept(tcp_stream, &config)
            .await
            .map(|connection| connection.room_key)
    });

    // a raw tcp connection which never sends the upgrade request
    let _idle = tokio::net::TcpStream::connect(server_url.trim_start_matches("ws://"))
        .await
        .unwrap();

    assert!(matches!(
        server.await.unwrap(),
        Err(AcceptError::Timeout(_))
    ));
}
