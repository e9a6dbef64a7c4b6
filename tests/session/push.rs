//! Tests for server push

use bytes::Bytes;
use h2_engine::{ErrorCode, Frame, H2Error, SessionConfig, SessionEvent, StreamState};

use super::{connected, connected_with, drain_events, pump, request, response, written_frames};

fn push_enabled() -> (h2_engine::Session, h2_engine::Session) {
    connected_with(
        SessionConfig::client().with_enable_push(true),
        SessionConfig::server(),
    )
}

#[test]
fn test_pushed_response_reaches_client() {
    let (mut client, mut server) = push_enabled();
    let stream_id = client.send_request(&request("/index.html"), None, true).unwrap();
    pump(&mut client, &mut server).unwrap();

    let promised_id = server.push_promise(stream_id, &request("/style.css")).unwrap();
    assert_eq!(promised_id, 2);
    assert_eq!(
        server.stream(promised_id).unwrap().state(),
        StreamState::ReservedLocal
    );
    server.send_headers(promised_id, &response("200"), false).unwrap();
    server
        .send_data(promised_id, Bytes::from_static(b"body{}"), true)
        .unwrap();
    assert!(server.stream(promised_id).is_none());

    pump(&mut server, &mut client).unwrap();
    let events = drain_events(&mut client);
    assert_eq!(
        events[0],
        SessionEvent::PushPromise {
            stream_id,
            promised_id
        }
    );
    assert!(events.contains(&SessionEvent::Data {
        stream_id: promised_id,
        len: 6,
        end_stream: true
    }));

    let promised = client.take_headers(promised_id).unwrap().unwrap();
    assert_eq!(promised.fields[2].value, "/style.css");
    let pushed = client.take_headers(promised_id).unwrap().unwrap();
    assert_eq!(pushed.fields, response("200"));
    let chunk = client.read_data(promised_id).unwrap().unwrap();
    assert_eq!(&chunk.data[..], b"body{}");
    assert!(client.stream(promised_id).is_none());
    assert_eq!(client.last_peer_stream_id(), promised_id);
}

#[test]
fn test_push_refused_when_peer_disabled_it() {
    let (mut client, mut server) = connected();
    let stream_id = client.send_request(&request("/"), None, true).unwrap();
    pump(&mut client, &mut server).unwrap();

    match server.push_promise(stream_id, &request("/style.css")) {
        Err(H2Error::Stream { code, .. }) => assert_eq!(code, ErrorCode::RefusedStream),
        other => panic!("Expected a refused push, got {:?}", other),
    }
    assert!(written_frames(&mut server).is_empty());
}

#[test]
fn test_push_promise_to_client_with_push_disabled() {
    let (mut client, mut server) = push_enabled();
    let stream_id = client.send_request(&request("/"), None, true).unwrap();
    pump(&mut client, &mut server).unwrap();
    server.push_promise(stream_id, &request("/a.js")).unwrap();

    // Replay the server's promise against a client that never enabled push.
    let (mut strict, _) = connected();
    strict.send_request(&request("/"), None, true).unwrap();
    written_frames(&mut strict);
    let mut buf = bytes::BytesMut::new();
    server.poll_output(&mut buf);
    let err = strict.recv(&buf).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
    assert!(strict.is_closed());
}

#[test]
fn test_clients_cannot_push() {
    let (mut client, _server) = push_enabled();
    let stream_id = client.send_request(&request("/"), None, false).unwrap();
    assert!(client.push_promise(stream_id, &request("/x")).is_err());
}

#[test]
fn test_push_promise_to_server_is_protocol_error() {
    let (_client, mut server) = connected();
    let frame = Frame::PushPromise {
        stream_id: 1,
        promised_id: 2,
        block: Bytes::from_static(&[0x82]),
        end_headers: true,
    };
    let err = server.recv(&frame.to_bytes()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}
