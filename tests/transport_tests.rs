//! WebSocket transport against a local server: encoding, heart-beats and failures

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use train_sim::broker::{
    BrokerClient, BrokerError, BrokerSettings, Command, Connector, Frame, FrameError, Heartbeat,
    Link, ReconnectPolicy, WsConnector,
};
use train_sim::diagnostics::{Diagnostics, FailureKind};

type Server = WebSocketStream<TcpStream>;

const PREFERRED: Heartbeat = Heartbeat {
    outgoing_ms: 1000,
    incoming_ms: 1000,
};

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> Server {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

async fn next_text(server: &mut Server) -> String {
    match timeout(Duration::from_secs(5), server.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        other => panic!("expected a text message, got {:?}", other),
    }
}

/// Read the client's CONNECT and answer with CONNECTED
async fn handshake(server: &mut Server, heart_beat: &str) {
    let connect = Frame::decode(&next_text(server).await).unwrap().unwrap();
    assert_eq!(connect.command, Command::Connect);
    let connected = Frame::new(Command::Connected)
        .header("version", "1.2")
        .header("heart-beat", heart_beat);
    server.send(Message::Text(connected.encode())).await.unwrap();
}

/// Open a link and complete the STOMP handshake on both sides
async fn connected_link(heart_beat: &str) -> (Link, Server) {
    let (listener, url) = listen().await;
    let connector = WsConnector::new(url, PREFERRED);
    let (link, mut server) = tokio::join!(connector.connect(), accept(&listener));
    let mut link = link.unwrap();

    link.outbound
        .send(Frame::connect("localhost", PREFERRED))
        .await
        .unwrap();
    handshake(&mut server, heart_beat).await;
    let connected = link.inbound.recv().await.unwrap().unwrap();
    assert_eq!(connected.command, Command::Connected);
    (link, server)
}

async fn next_inbound(link: &mut Link) -> Option<Result<Frame, BrokerError>> {
    timeout(Duration::from_secs(5), link.inbound.recv())
        .await
        .expect("no inbound item within 5s")
}

/// Test that frames go out as text and heart-beats start once CONNECTED is negotiated
#[tokio::test]
async fn test_frames_are_sent_as_text_and_heartbeats_follow() {
    let (link, mut server) = connected_link("500,500").await;

    let send = Frame::send("/app/locate", r#"{"id":1}"#.to_string());
    link.outbound.send(send.clone()).await.unwrap();
    assert_eq!(next_text(&mut server).await, send.encode());

    // Negotiated outgoing period is max(1000, 500), well inside the 2s watchdog
    let started = tokio::time::Instant::now();
    assert_eq!(next_text(&mut server).await, "\n");
    assert!(started.elapsed() < Duration::from_millis(1900));
}

/// Test that a server that stops sending trips the incoming heart-beat watchdog
#[tokio::test]
async fn test_silent_server_times_out() {
    let (mut link, _server) = connected_link("500,500").await;

    match next_inbound(&mut link).await {
        Some(Err(BrokerError::HeartbeatTimeout(waited))) => {
            assert_eq!(waited, Duration::from_millis(2000));
        }
        other => panic!("expected a heart-beat timeout, got {:?}", other),
    }
}

/// Test that a close from the server ends the link with Closed
#[tokio::test]
async fn test_server_close_is_reported() {
    let (mut link, mut server) = connected_link("0,0").await;

    server.close(None).await.unwrap();

    assert!(matches!(
        next_inbound(&mut link).await,
        Some(Err(BrokerError::Closed))
    ));
}

/// Test that a binary message that is not UTF-8 ends the link with a frame error
#[tokio::test]
async fn test_non_utf8_binary_is_rejected() {
    let (mut link, mut server) = connected_link("0,0").await;

    server
        .send(Message::Binary(vec![0xff, 0xfe, 0x00]))
        .await
        .unwrap();

    assert!(matches!(
        next_inbound(&mut link).await,
        Some(Err(BrokerError::Frame(FrameError::NotUtf8)))
    ));
}

/// Test that a heart-beat timeout is reported as a connection failure and retried
#[tokio::test]
async fn test_heartbeat_timeout_triggers_reconnect() {
    let (listener, url) = listen().await;
    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let mut server = accept(&listener).await;
            let _ = accepted_tx.send(());
            tokio::spawn(async move {
                handshake(&mut server, "500,500").await;
                // Keep reading so the socket stays open, but never answer
                while let Some(Ok(_)) = server.next().await {}
            });
        }
    });

    let settings = BrokerSettings {
        host: "localhost".to_string(),
        heartbeat: PREFERRED,
        policy: ReconnectPolicy::new(Duration::from_millis(100), 3),
        handshake_timeout: Duration::from_secs(5),
    };
    let diagnostics = Arc::new(Diagnostics::new());
    let client = BrokerClient::new(
        settings,
        Arc::new(WsConnector::new(url, PREFERRED)),
        diagnostics.clone(),
    );
    client.start();
    client.wait_connected().await.unwrap();
    accepted.recv().await.unwrap();

    timeout(Duration::from_secs(6), accepted.recv())
        .await
        .expect("client did not reconnect after the timeout")
        .unwrap();
    assert_eq!(diagnostics.count(FailureKind::Connection), 1);

    client.shutdown();
}
