//! Tests for shutdown, GOAWAY draining and transport loss

use std::time::Duration;

use bytes::Bytes;
use h2_engine::{ErrorCode, H2Error, SessionConfig, SessionState};

use super::{connect, connect_with, read_body, request, response};

#[tokio::test]
async fn test_shutdown_fails_pending_operations() {
    let pair = connect();
    let stream = pair.client.send_request(&request("/slow"), true).unwrap();
    let waiter = tokio::spawn(async move { stream.headers().await });
    tokio::task::yield_now().await;

    pair.client.shutdown();
    match waiter.await.unwrap() {
        Err(H2Error::SessionClosed(code)) => assert_eq!(code, ErrorCode::Cancel),
        other => panic!("Expected SessionClosed, got {:?}", other),
    }
    pair.client_task.await.unwrap().unwrap();
    assert!(pair.client.is_closed());
    assert!(matches!(
        pair.client.send_request(&request("/"), true),
        Err(H2Error::SessionClosed(_))
    ));
    assert!(pair.client.ping().await.is_err());

    // The server sees the transport go away.
    pair.server.closed().await;
    pair.server_task.await.unwrap().unwrap();
    assert_eq!(
        pair.server.with_session(|s| s.state()),
        SessionState::Closed(ErrorCode::NoError)
    );
}

#[tokio::test]
async fn test_accept_ends_when_connection_finishes() {
    let pair = connect();
    pair.server.shutdown();
    assert!(pair.server.accept().await.is_none());
    pair.server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_graceful_goaway_completes_in_flight_stream() {
    let pair = connect();
    let mut stream = pair.client.send_request(&request("/"), true).unwrap();

    let mut accepted = pair.server.accept().await.unwrap();
    accepted.headers().await.unwrap();
    assert!(accepted.data().await.is_none());
    pair.server
        .go_away(ErrorCode::NoError, Bytes::from_static(b"restart"))
        .unwrap();
    assert!(!pair.server.is_closed());

    accepted.send_headers(&response("200"), false).unwrap();
    accepted
        .send_data(Bytes::from_static(b"last"), true)
        .await
        .unwrap();
    drop(accepted);

    assert_eq!(stream.headers().await.unwrap().fields, response("200"));
    assert_eq!(read_body(&mut stream).await, b"last");
    drop(stream);

    pair.server_task.await.unwrap().unwrap();
    pair.client_task.await.unwrap().unwrap();
    assert_eq!(
        pair.server.with_session(|s| s.state()),
        SessionState::Closed(ErrorCode::NoError)
    );
}

#[tokio::test(start_paused = true)]
async fn test_drain_timeout_closes_connection() {
    let pair = connect_with(
        SessionConfig::client(),
        SessionConfig::server().with_drain_timeout(Duration::from_secs(1)),
    );
    let _stream = pair.client.send_request(&request("/stuck"), false).unwrap();
    let _accepted = pair.server.accept().await.unwrap();

    pair.server.go_away(ErrorCode::NoError, Bytes::new()).unwrap();
    pair.server_task.await.unwrap().unwrap();
    assert_eq!(
        pair.server.with_session(|s| s.state()),
        SessionState::Closed(ErrorCode::Cancel)
    );

    pair.client.closed().await;
}

#[tokio::test]
async fn test_goaway_refuses_new_requests() {
    let pair = connect();
    pair.server.go_away(ErrorCode::NoError, Bytes::new()).unwrap();

    // With nothing in flight the server closes at once; the client sees
    // GOAWAY and then the end of the transport.
    pair.server_task.await.unwrap().unwrap();
    pair.client.closed().await;
    assert!(pair.client.send_request(&request("/"), true).is_err());
}

#[tokio::test]
async fn test_dropped_handle_resets_open_stream() {
    let pair = connect();
    let stream = pair.client.send_request(&request("/"), false).unwrap();
    let id = stream.id();

    let accepted = pair.server.accept().await.unwrap();
    accepted.headers().await.unwrap();
    drop(stream);

    let mut accepted = accepted;
    match accepted.data().await {
        Some(Err(H2Error::Stream { code, .. })) => assert_eq!(code, ErrorCode::Cancel),
        other => panic!("Expected a CANCEL reset, got {:?}", other),
    }
    assert_eq!(accepted.id(), id);
}
