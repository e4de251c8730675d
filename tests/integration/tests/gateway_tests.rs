//! Gateway Integration Tests
//!
//! Every test spawns its own gateway on an ephemeral port and talks to it
//! over real sockets.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use integration_tests::{quiet_client, TestGateway, ECHO_SUFFIX};
use relay_common::Protocol;
use relay_gateway::{ClientOptions, Frame, OpCode, RelayError, ServerOptions};
use std::time::Duration;

async fn assert_echo(protocol: Protocol) {
    let gateway = TestGateway::start(protocol).await.unwrap();
    let client = gateway.connect("user_1", quiet_client()).await.unwrap();

    client.send(b"hello").await.unwrap();
    let frame = client.read().await.unwrap();
    assert_eq!(frame.op(), OpCode::Binary);
    assert_eq!(frame.payload(), format!("hello{ECHO_SUFFIX}").as_bytes());
}

async fn assert_idle_timeout(protocol: Protocol) {
    let options = ServerOptions::default().with_read_wait(Duration::from_secs(1));
    let gateway = TestGateway::start_with_options(protocol, options).await.unwrap();
    let client = gateway.connect("user_1", quiet_client()).await.unwrap();

    let id = gateway.next_disconnect(Duration::from_secs(3)).await;
    assert_eq!(id.as_deref(), Some("user_1"));
    assert!(!gateway.server.channels().contains("user_1"));

    // Exactly one notification.
    assert!(gateway.next_disconnect(Duration::from_millis(500)).await.is_none());

    // The gateway hung up on the idle client.
    assert!(client.read().await.is_err());
}

async fn assert_duplicate_rejected(protocol: Protocol) {
    let gateway = TestGateway::start(protocol).await.unwrap();
    let first = gateway.connect("user_1", quiet_client()).await.unwrap();

    let second = gateway.client("user_1", quiet_client());
    second.connect(&gateway.dial_address()).await.unwrap();
    let err = second.read().await.unwrap_err();
    assert!(matches!(err, RelayError::RemoteClosed), "unexpected error: {err}");

    // The first connection keeps working.
    first.send(b"ping").await.unwrap();
    let frame = first.read().await.unwrap();
    assert_eq!(frame.payload(), format!("ping{ECHO_SUFFIX}").as_bytes());
    assert_eq!(gateway.server.channels().len(), 1);
}

#[tokio::test]
async fn test_ws_echo() {
    assert_echo(Protocol::Ws).await;
}

#[tokio::test]
async fn test_tcp_echo() {
    assert_echo(Protocol::Tcp).await;
}

#[tokio::test]
async fn test_ws_idle_timeout() {
    assert_idle_timeout(Protocol::Ws).await;
}

#[tokio::test]
async fn test_tcp_idle_timeout() {
    assert_idle_timeout(Protocol::Tcp).await;
}

#[tokio::test]
async fn test_ws_duplicate_id_rejected() {
    assert_duplicate_rejected(Protocol::Ws).await;
}

#[tokio::test]
async fn test_tcp_duplicate_id_rejected() {
    assert_duplicate_rejected(Protocol::Tcp).await;
}

#[tokio::test]
async fn test_health_check() {
    let gateway = TestGateway::start(Protocol::Ws).await.unwrap();
    let response = gateway.get("/health").await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_empty_id_rejected() {
    let gateway = TestGateway::start(Protocol::Tcp).await.unwrap();
    let client = gateway.client("", quiet_client());
    client.connect(&gateway.dial_address()).await.unwrap();

    assert!(matches!(client.read().await, Err(RelayError::RemoteClosed)));
    assert!(gateway.server.channels().is_empty());
}

#[tokio::test]
async fn test_server_push() {
    let gateway = TestGateway::start(Protocol::Tcp).await.unwrap();
    let client = gateway.connect("user_1", quiet_client()).await.unwrap();

    gateway.server.push("user_1", b"notice".to_vec()).await.unwrap();
    assert_eq!(client.read().await.unwrap(), Frame::binary("notice"));

    let err = gateway.server.push("user_2", b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, RelayError::ChannelNotFound(_)));
}

#[tokio::test]
async fn test_heartbeat_keeps_channel_alive() {
    for protocol in [Protocol::Tcp, Protocol::Ws] {
        let options = ServerOptions::default().with_read_wait(Duration::from_secs(1));
        let gateway = TestGateway::start_with_options(protocol, options).await.unwrap();
        let heartbeat = ClientOptions::default().with_heartbeat(Duration::from_millis(200));
        let client = gateway.connect("user_1", heartbeat).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(gateway.server.channels().contains("user_1"), "{protocol} channel timed out");

        client.send(b"alive").await.unwrap();
        let frame = client.read().await.unwrap();
        assert_eq!(frame.payload(), format!("alive{ECHO_SUFFIX}").as_bytes());
    }
}

#[tokio::test]
async fn test_client_close_notifies_once() {
    let gateway = TestGateway::start(Protocol::Ws).await.unwrap();
    let client = gateway.connect("user_1", quiet_client()).await.unwrap();

    client.close().await;
    let id = gateway.next_disconnect(Duration::from_secs(3)).await;
    assert_eq!(id.as_deref(), Some("user_1"));
    assert!(gateway.next_disconnect(Duration::from_millis(300)).await.is_none());
    assert!(gateway.server.channels().is_empty());
}

#[tokio::test]
async fn test_shutdown_disconnects_everyone() {
    let gateway = TestGateway::start(Protocol::Tcp).await.unwrap();
    let a = gateway.connect("a", quiet_client()).await.unwrap();
    let b = gateway.connect("b", quiet_client()).await.unwrap();

    gateway.server.shutdown().await.unwrap();
    assert!(a.read().await.is_err());
    assert!(b.read().await.is_err());
}
