//! Tests for stream and connection error handling

use bytes::Bytes;
use h2_engine::{ErrorCode, Frame, H2Error, SessionEvent, SessionState};

use super::{connected, drain_events, pump, request, written_frames};

#[test]
fn test_peer_reset_removes_stream() {
    let (mut client, mut server) = connected();
    let stream_id = client.send_request(&request("/"), None, false).unwrap();
    pump(&mut client, &mut server).unwrap();

    server.reset_stream(stream_id, ErrorCode::Cancel).unwrap();
    assert!(server.stream(stream_id).is_none());
    pump(&mut server, &mut client).unwrap();

    assert!(client.stream(stream_id).is_none());
    assert_eq!(
        drain_events(&mut client),
        vec![SessionEvent::StreamReset {
            stream_id,
            error_code: ErrorCode::Cancel,
            remote: true
        }]
    );
    match client.send_data(stream_id, Bytes::from_static(b"x"), false) {
        Err(H2Error::StreamNotFound(id)) => assert_eq!(id, stream_id),
        other => panic!("Expected StreamNotFound, got {:?}", other),
    }
}

#[test]
fn test_data_on_reset_stream_answered_with_stream_closed() {
    let (mut client, mut server) = connected();
    let stream_id = client.send_request(&request("/"), None, false).unwrap();
    pump(&mut client, &mut server).unwrap();
    server.reset_stream(stream_id, ErrorCode::Cancel).unwrap();
    written_frames(&mut server);

    let data = Frame::Data {
        stream_id,
        data: Bytes::from_static(b"late"),
        end_stream: false,
        padding: None,
    };
    server.recv(&data.to_bytes()).unwrap();
    assert!(!server.is_closed());
    assert_eq!(
        written_frames(&mut server),
        vec![Frame::rst_stream(stream_id, ErrorCode::StreamClosed)]
    );

    // A late RST_STREAM is ignored without a reply.
    server
        .recv(&Frame::rst_stream(stream_id, ErrorCode::Cancel).to_bytes())
        .unwrap();
    assert!(written_frames(&mut server).is_empty());
}

#[test]
fn test_malformed_priority_resets_only_its_stream() {
    let (mut client, mut server) = connected();
    let stream_id = client.send_request(&request("/"), None, false).unwrap();
    pump(&mut client, &mut server).unwrap();
    drain_events(&mut server);
    written_frames(&mut server);

    // PING, a PRIORITY with a 4-byte payload, PING: all in one read.
    let mut wire = Frame::ping([1; 8]).to_bytes().to_vec();
    wire.extend_from_slice(&[0, 0, 4, 0x2, 0, 0, 0, 0, stream_id as u8, 0, 0, 0, 0]);
    wire.extend_from_slice(&Frame::ping([2; 8]).to_bytes());
    server.recv(&wire).unwrap();

    assert_eq!(server.state(), SessionState::Open);
    assert!(server.stream(stream_id).is_none());
    assert_eq!(
        written_frames(&mut server),
        vec![
            Frame::ping_ack([1; 8]),
            Frame::rst_stream(stream_id, ErrorCode::FrameSizeError),
            Frame::ping_ack([2; 8]),
        ]
    );
    assert_eq!(
        drain_events(&mut server),
        vec![
            SessionEvent::Ping { payload: [1; 8] },
            SessionEvent::StreamReset {
                stream_id,
                error_code: ErrorCode::FrameSizeError,
                remote: false
            },
            SessionEvent::Ping { payload: [2; 8] },
        ]
    );

    // The session keeps serving new streams.
    let next = client.send_request(&request("/next"), None, true).unwrap();
    pump(&mut client, &mut server).unwrap();
    assert!(server.stream(next).is_some());
}

#[test]
fn test_discarded_data_still_credits_session() {
    let (mut client, mut server) = connected();
    let stream_id = client.send_request(&request("/"), None, false).unwrap();
    pump(&mut client, &mut server).unwrap();
    server.reset_stream(stream_id, ErrorCode::Cancel).unwrap();
    written_frames(&mut server);

    for _ in 0..2 {
        let data = Frame::Data {
            stream_id,
            data: Bytes::from(vec![0u8; 16_384]),
            end_stream: false,
            padding: None,
        };
        server.recv(&data.to_bytes()).unwrap();
    }
    assert_eq!(server.flow().session_recv_window(), 65_535);
    assert!(written_frames(&mut server).contains(&Frame::window_update(0, 32_768)));
}

#[test]
fn test_rst_stream_on_idle_stream_is_protocol_error() {
    let (_client, mut server) = connected();
    let err = server
        .recv(&Frame::rst_stream(7, ErrorCode::Cancel).to_bytes())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
    assert_eq!(server.state(), SessionState::Closed(ErrorCode::ProtocolError));
}

#[test]
fn test_headers_on_server_initiated_id_is_protocol_error() {
    let (mut client, mut server) = connected();
    let block = {
        // Borrow a real encoded block from the client.
        client.send_request(&request("/"), None, true).unwrap();
        match written_frames(&mut client).remove(0) {
            Frame::Headers { block, .. } => block,
            other => panic!("Expected HEADERS, got {:?}", other),
        }
    };
    let headers = Frame::Headers {
        stream_id: 2,
        block,
        priority: None,
        end_stream: true,
        end_headers: true,
    };
    let err = server.recv(&headers.to_bytes()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn test_invalid_header_block_is_compression_error() {
    let (_client, mut server) = connected();
    let headers = Frame::Headers {
        stream_id: 1,
        block: Bytes::from_static(&[0x80]),
        priority: None,
        end_stream: true,
        end_headers: true,
    };
    let err = server.recv(&headers.to_bytes()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompressionError);
    assert!(server.is_closed());
}

#[test]
fn test_fatal_error_resets_every_stream() {
    let (mut client, mut server) = connected();
    let a = client.send_request(&request("/a"), None, false).unwrap();
    let b = client.send_request(&request("/b"), None, false).unwrap();
    pump(&mut client, &mut server).unwrap();
    drain_events(&mut server);

    // DATA on stream 0 is a connection error.
    let bad = Frame::Data {
        stream_id: 0,
        data: Bytes::from_static(b"x"),
        end_stream: false,
        padding: None,
    };
    let err = server.recv(&bad.to_bytes()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);

    let mut events = drain_events(&mut server);
    assert_eq!(
        events.pop(),
        Some(SessionEvent::Closed {
            error_code: ErrorCode::ProtocolError
        })
    );
    let mut reset: Vec<u32> = events
        .iter()
        .map(|event| match event {
            SessionEvent::StreamReset {
                stream_id,
                error_code: ErrorCode::ProtocolError,
                remote: false,
            } => *stream_id,
            other => panic!("Expected StreamReset, got {:?}", other),
        })
        .collect();
    reset.sort_unstable();
    assert_eq!(reset, vec![a, b]);
    assert!(server.streams().is_empty());

    match written_frames(&mut server).as_slice() {
        [Frame::GoAway {
            last_stream_id,
            error_code,
            ..
        }] => {
            assert_eq!(*last_stream_id, b);
            assert_eq!(*error_code, ErrorCode::ProtocolError.as_u32());
        }
        other => panic!("Expected GOAWAY, got {:?}", other),
    }
}

#[test]
fn test_operations_fail_after_close() {
    let (mut client, _server) = connected();
    client.close(ErrorCode::Cancel);
    assert!(matches!(
        client.send_request(&request("/"), None, true),
        Err(H2Error::SessionClosed(ErrorCode::Cancel))
    ));
    assert!(matches!(client.ping(), Err(H2Error::SessionClosed(_))));
    assert!(matches!(
        client.recv(&Frame::ping([0; 8]).to_bytes()),
        Err(H2Error::SessionClosed(_))
    ));
    assert!(!client.has_pending_output());
}
