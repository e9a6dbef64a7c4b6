//! Session state machine integration tests

mod errors;
mod events;
mod goaway;
mod push;

use bytes::BytesMut;
use h2_engine::{is_h2c_preface, Frame, H2Codec, HeaderField, Session, SessionConfig, SessionEvent};

pub fn request(path: &str) -> Vec<HeaderField> {
    vec![
        HeaderField::new(":method", "GET"),
        HeaderField::new(":scheme", "https"),
        HeaderField::new(":path", path),
        HeaderField::new(":authority", "example.com"),
    ]
}

pub fn response(status: &str) -> Vec<HeaderField> {
    vec![
        HeaderField::new(":status", status),
        HeaderField::new("content-type", "text/plain"),
    ]
}

/// Move everything `from` has queued into `to`.
pub fn pump(from: &mut Session, to: &mut Session) -> h2_engine::Result<()> {
    let mut buf = BytesMut::new();
    from.poll_output(&mut buf);
    to.recv(&buf)
}

/// Client and server that have exchanged prefaces and SETTINGS.
pub fn connected_with(client: SessionConfig, server: SessionConfig) -> (Session, Session) {
    let mut client = Session::client(client);
    let mut server = Session::server(server);
    pump(&mut client, &mut server).unwrap();
    pump(&mut server, &mut client).unwrap();
    pump(&mut client, &mut server).unwrap();
    drain_events(&mut client);
    drain_events(&mut server);
    (client, server)
}

pub fn connected() -> (Session, Session) {
    connected_with(SessionConfig::client(), SessionConfig::server())
}

pub fn drain_events(session: &mut Session) -> Vec<SessionEvent> {
    std::iter::from_fn(|| session.poll_event()).collect()
}

pub fn written_frames(session: &mut Session) -> Vec<Frame> {
    let mut buf = BytesMut::new();
    session.poll_output(&mut buf);
    let mut codec = if is_h2c_preface(&buf) {
        H2Codec::server()
    } else {
        H2Codec::new()
    };
    codec.process(&buf).unwrap()
}
