//! Integration tests for the TCP gateway.
//!
//! These run a real server on an ephemeral port and speak the
//! line-delimited JSON protocol over actual sockets.

mod common;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

use presence_protocol::{DeviceMessage, ServerMessage};
use presenced::gateway::GatewayServer;

use common::{at, build_world, TestWorld};

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, msg: &DeviceMessage) {
        let mut json = serde_json::to_string(msg).expect("serialize");
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await.expect("write");
        self.writer.flush().await.expect("flush");
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("write");
        self.writer.write_all(b"\n").await.expect("write");
        self.writer.flush().await.expect("flush");
    }

    async fn recv(&mut self) -> ServerMessage {
        let mut line = String::new();
        timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("response within timeout")
            .expect("read");
        serde_json::from_str(&line).expect("parse server message")
    }

    async fn recv_raw(&mut self) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("response within timeout")
            .expect("read");
        line
    }
}

async fn start_gateway(world: &TestWorld) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = Arc::new(GatewayServer::new(
        addr.to_string(),
        world.handle.clone(),
        world.cancel.clone(),
    ));
    tokio::spawn(async move {
        let _ = server.run_with_listener(listener).await;
    });
    addr
}

#[tokio::test]
async fn test_authenticate_then_scan() {
    let world = build_world().await;
    world.clock.set(at(8, 45));
    world.handle.tick_mode().await;
    let addr = start_gateway(&world).await;

    let mut reader = Client::connect(addr).await;
    reader.send(&DeviceMessage::authenticate("out-101")).await;
    match reader.recv().await {
        ServerMessage::Authenticated { success, .. } => assert!(success),
        other => panic!("unexpected frame: {other:?}"),
    }

    // A known student entering during early access
    reader.send(&DeviceMessage::rfid_scan("tag-s-1", "out-101")).await;
    match reader.recv().await {
        ServerMessage::ScanResult {
            success,
            user,
            movement,
            ..
        } => {
            assert!(success);
            assert_eq!(user.map(|u| u.name), Some("Student s-1".to_string()));
            assert_eq!(movement, Some(presence_protocol::Movement::In));
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    // An unknown card is rejected with a long beep
    reader.send(&DeviceMessage::rfid_scan("bogus", "out-101")).await;
    match reader.recv().await {
        ServerMessage::ScanResult {
            success,
            beep_pattern,
            ..
        } => {
            assert!(!success);
            assert_eq!(beep_pattern, Some(presence_protocol::BeepPattern::Long));
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_device_handshake_rejected() {
    let world = build_world().await;
    let addr = start_gateway(&world).await;

    let mut client = Client::connect(addr).await;
    client.send(&DeviceMessage::authenticate("ghost-reader")).await;
    match client.recv().await {
        ServerMessage::Authenticated { success, message } => {
            assert!(!success);
            assert!(message.is_some());
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn test_scan_before_authenticate_is_refused() {
    let world = build_world().await;
    let addr = start_gateway(&world).await;

    let mut client = Client::connect(addr).await;
    client.send(&DeviceMessage::rfid_scan("tag-s-1", "out-101")).await;
    match client.recv().await {
        ServerMessage::Error { message } => {
            assert!(message.contains("authenticate") || message.contains("subscribe"));
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_handshake_closes_connection_but_server_survives() {
    let world = build_world().await;
    let addr = start_gateway(&world).await;

    let mut client = Client::connect(addr).await;
    client.send_raw("this is not json").await;
    // The handler drops the connection; EOF reads as an empty line
    let line = client.recv_raw().await;
    assert!(line.is_empty());

    let mut reader = Client::connect(addr).await;
    reader.send(&DeviceMessage::authenticate("out-101")).await;
    match reader.recv().await {
        ServerMessage::Authenticated { success, .. } => assert!(success),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_pong() {
    let world = build_world().await;
    let addr = start_gateway(&world).await;

    let mut reader = Client::connect(addr).await;
    reader.send(&DeviceMessage::authenticate("in-101")).await;
    let _ = reader.recv().await;

    reader.send(&DeviceMessage::Ping { seq: 7 }).await;
    match reader.recv().await {
        ServerMessage::Pong { seq } => assert_eq!(seq, 7),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn test_dashboard_receives_activity_events() {
    let world = build_world().await;
    world.clock.set(at(8, 45));
    world.handle.tick_mode().await;
    let addr = start_gateway(&world).await;

    // Dashboard subscribes first; the ping round-trip guarantees the
    // subscription registered before the scan below
    let mut dashboard = Client::connect(addr).await;
    dashboard.send(&DeviceMessage::Subscribe).await;
    dashboard.send(&DeviceMessage::Ping { seq: 1 }).await;
    let _ = dashboard.recv().await;

    // Reader produces a scan
    let mut reader = Client::connect(addr).await;
    reader.send(&DeviceMessage::authenticate("out-101")).await;
    let _ = reader.recv().await;
    reader.send(&DeviceMessage::rfid_scan("tag-s-1", "out-101")).await;
    let _ = reader.recv().await;

    // The dashboard sees the device activity
    let frame = dashboard.recv_raw().await;
    let event: serde_json::Value = serde_json::from_str(&frame).expect("event json");
    assert_eq!(event["type"], "device_activity");
    assert_eq!(event["device_id"], "out-101");
    assert_eq!(event["accepted"], true);
}
