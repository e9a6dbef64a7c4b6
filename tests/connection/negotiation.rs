//! Tests for starting connections from a negotiated protocol

use std::sync::Arc;
use std::time::Duration;

use h2_engine::{
    http1, Connection, ErrorCode, H2Error, ProtocolSelectionMonitor, Role, SessionConfig,
};
use tokio::io::AsyncReadExt;

use super::init_test_logging;

#[tokio::test]
async fn test_unsupported_protocol_is_refused() {
    init_test_logging();
    let (io, _peer) = tokio::io::duplex(1024);
    match Connection::from_negotiated("http/1.1", Role::Server, io, SessionConfig::server()) {
        Err(H2Error::UnsupportedProtocol(name)) => assert_eq!(name, "http/1.1"),
        Err(other) => panic!("Expected UnsupportedProtocol, got {:?}", other),
        Ok(_) => panic!("Expected UnsupportedProtocol, got a connection"),
    }
}

#[tokio::test]
async fn test_refused_client_gets_http1_response() {
    let (mut io, mut peer) = tokio::io::duplex(1024);
    let protocol = "http/1.1";
    if !h2_engine::is_http2_protocol(protocol) {
        let err = H2Error::UnsupportedProtocol(protocol.to_owned());
        assert_eq!(err.code(), ErrorCode::Http11Required);
        http1::send_error_response(&mut io, 505, "HTTP Version Not Supported", &err.to_string())
            .await
            .unwrap();
        drop(io);
    }

    let mut received = String::new();
    peer.read_to_string(&mut received).await.unwrap();
    assert!(received.starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"));
    assert!(received.ends_with("unsupported application protocol \"http/1.1\""));
}

#[tokio::test]
async fn test_draft_identifier_starts_connection() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, client_conn) =
        Connection::from_negotiated("h2-14", Role::Client, client_io, SessionConfig::client())
            .unwrap();
    let (_server, server_conn) =
        Connection::from_negotiated("h2", Role::Server, server_io, SessionConfig::server())
            .unwrap();
    tokio::spawn(client_conn.run());
    tokio::spawn(server_conn.run());

    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_connection_waits_for_monitor() {
    let monitor = Arc::new(ProtocolSelectionMonitor::new());
    let (io, _peer) = tokio::io::duplex(1024);

    let selector = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            monitor.on_protocol_selected("h2c");
        })
    };
    let (handle, _conn) =
        Connection::from_monitor(&monitor, Role::Server, io, SessionConfig::server())
            .await
            .unwrap();
    selector.await.unwrap();
    assert!(!handle.is_closed());
    assert_eq!(monitor.selected().as_deref(), Some("h2c"));
}

#[tokio::test(start_paused = true)]
async fn test_monitor_wait_is_bounded() {
    let monitor = ProtocolSelectionMonitor::new();
    let (io, _peer) = tokio::io::duplex(1024);
    let config = SessionConfig::server().with_handshake_timeout(Duration::from_secs(2));

    let err = Connection::from_monitor(&monitor, Role::Server, io, config)
        .await
        .unwrap_err();
    assert!(matches!(err, H2Error::HandshakeTimeout));
}

#[tokio::test]
async fn test_monitor_rejects_second_observer() {
    let monitor = ProtocolSelectionMonitor::new();
    let seen = Arc::new(parking_lot::Mutex::new(None));
    let sink = Arc::clone(&seen);
    monitor
        .attach(Box::new(move |name: &str| *sink.lock() = Some(name.to_owned())))
        .unwrap();
    assert!(matches!(
        monitor.attach(Box::new(|_: &str| {})),
        Err(H2Error::MonitorBusy)
    ));

    monitor.on_protocol_selected("h2");
    assert_eq!(seen.lock().as_deref(), Some("h2"));
}
