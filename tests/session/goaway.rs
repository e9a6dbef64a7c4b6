//! Tests for GOAWAY and session draining

use bytes::Bytes;
use h2_engine::{ErrorCode, Frame, H2Error, SessionEvent, SessionState};

use super::{connected, drain_events, pump, request, response, written_frames};

#[test]
fn test_graceful_goaway_drains() {
    let (mut client, mut server) = connected();
    let kept = client.send_request(&request("/kept"), None, true).unwrap();
    pump(&mut client, &mut server).unwrap();
    // Sent after the server's GOAWAY was written.
    let refused = client.send_request(&request("/late"), None, true).unwrap();

    server.go_away(ErrorCode::NoError, Bytes::new()).unwrap();
    assert_eq!(server.state(), SessionState::Draining);
    assert!(!server.is_drained());

    pump(&mut server, &mut client).unwrap();
    assert_eq!(client.state(), SessionState::Draining);
    assert!(client.stream(kept).is_some());
    assert!(client.stream(refused).is_none());

    let events = drain_events(&mut client);
    assert!(events.contains(&SessionEvent::StreamReset {
        stream_id: refused,
        error_code: ErrorCode::RefusedStream,
        remote: true
    }));
    assert!(events.contains(&SessionEvent::GoAway {
        last_stream_id: kept,
        error_code: ErrorCode::NoError,
        debug_data: Bytes::new()
    }));

    // New requests are refused once draining.
    assert!(matches!(
        client.send_request(&request("/new"), None, true),
        Err(H2Error::RefusedStream(_))
    ));

    // The server refuses the late stream too.
    pump(&mut client, &mut server).unwrap();
    assert!(server.stream(refused).is_none());
    assert!(written_frames(&mut server)
        .contains(&Frame::rst_stream(refused, ErrorCode::RefusedStream)));

    // Finishing the kept stream drains the server.
    server.take_headers(kept).unwrap();
    server.send_headers(kept, &response("204"), true).unwrap();
    server.read_data(kept).unwrap();
    assert!(server.is_drained());
    assert_eq!(server.state(), SessionState::Draining);
}

#[test]
fn test_goaway_with_error_closes() {
    let (mut client, mut server) = connected();
    let stream_id = client.send_request(&request("/"), None, false).unwrap();
    pump(&mut client, &mut server).unwrap();
    drain_events(&mut server);

    server
        .go_away(ErrorCode::EnhanceYourCalm, Bytes::from_static(b"slow down"))
        .unwrap();
    assert_eq!(
        server.state(),
        SessionState::Closed(ErrorCode::EnhanceYourCalm)
    );
    assert_eq!(
        drain_events(&mut server),
        vec![
            SessionEvent::StreamReset {
                stream_id,
                error_code: ErrorCode::EnhanceYourCalm,
                remote: false
            },
            SessionEvent::Closed {
                error_code: ErrorCode::EnhanceYourCalm
            },
        ]
    );

    pump(&mut server, &mut client).unwrap();
    let events = drain_events(&mut client);
    assert!(events.contains(&SessionEvent::GoAway {
        last_stream_id: stream_id,
        error_code: ErrorCode::EnhanceYourCalm,
        debug_data: Bytes::from_static(b"slow down")
    }));
    // Streams the peer did process stay until the transport goes away.
    assert!(client.stream(stream_id).is_some());
}

#[test]
fn test_unknown_goaway_code_maps_to_internal_error() {
    let (mut client, _server) = connected();
    let frame = Frame::GoAway {
        last_stream_id: 0,
        error_code: 0xdead,
        debug_data: Bytes::new(),
    };
    client.recv(&frame.to_bytes()).unwrap();
    assert!(drain_events(&mut client).contains(&SessionEvent::GoAway {
        last_stream_id: 0,
        error_code: ErrorCode::InternalError,
        debug_data: Bytes::new()
    }));
}
