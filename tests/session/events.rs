//! Tests for PING, listeners and other session events

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use h2_engine::{Frame, SessionConfig, SessionEvent};

use super::{connected, connected_with, drain_events, pump, request, written_frames};

#[test]
fn test_ping_round_trip() {
    let (mut client, mut server) = connected();
    let payload = client.ping().unwrap();
    pump(&mut client, &mut server).unwrap();
    assert_eq!(
        drain_events(&mut server),
        vec![SessionEvent::Ping { payload }]
    );

    pump(&mut server, &mut client).unwrap();
    match drain_events(&mut client).as_slice() {
        [SessionEvent::Pong { payload: echoed, .. }] => assert_eq!(*echoed, payload),
        other => panic!("Expected a single Pong, got {:?}", other),
    }
}

#[test]
fn test_ping_payloads_are_distinct() {
    let (mut client, _server) = connected();
    let first = client.ping().unwrap();
    let second = client.ping().unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_unsolicited_ping_ack_is_ignored() {
    let (mut client, _server) = connected();
    client.recv(&Frame::ping_ack([9; 8]).to_bytes()).unwrap();
    assert!(drain_events(&mut client).is_empty());
    assert!(!client.is_closed());
}

#[test]
fn test_manual_ping_ack() {
    let (_client, mut server) = connected_with(
        SessionConfig::client(),
        SessionConfig::server().with_auto_ping_ack(false),
    );
    server.recv(&Frame::ping([1; 8]).to_bytes()).unwrap();
    assert!(written_frames(&mut server).is_empty());
    assert_eq!(
        drain_events(&mut server),
        vec![SessionEvent::Ping { payload: [1; 8] }]
    );
}

#[test]
fn test_listener_receives_events_until_removed() {
    let (mut client, mut server) = connected();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = server.add_listener(Box::new(move |event: &SessionEvent| {
        sink.lock().unwrap().push(event.clone());
    }));

    client.send_request(&request("/one"), None, true).unwrap();
    pump(&mut client, &mut server).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);

    assert!(server.remove_listener(id));
    client.send_request(&request("/two"), None, true).unwrap();
    pump(&mut client, &mut server).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);

    // The queue still holds every event.
    assert_eq!(drain_events(&mut server).len(), 4);
}

#[test]
fn test_multiple_listeners_see_same_order() {
    let (mut client, mut server) = connected();
    let logs: Vec<Arc<Mutex<Vec<SessionEvent>>>> =
        (0..2).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
    for log in &logs {
        let sink = Arc::clone(log);
        server.add_listener(Box::new(move |event: &SessionEvent| {
            sink.lock().unwrap().push(event.clone());
        }));
    }

    let stream_id = client.send_request(&request("/"), None, false).unwrap();
    client
        .send_data(stream_id, Bytes::from_static(b"abc"), true)
        .unwrap();
    pump(&mut client, &mut server).unwrap();

    let first = logs[0].lock().unwrap().clone();
    assert_eq!(first, *logs[1].lock().unwrap());
    assert_eq!(first, drain_events(&mut server));
}

#[test]
fn test_window_update_event() {
    let (mut client, mut server) = connected();
    let stream_id = client.send_request(&request("/"), None, false).unwrap();
    client
        .send_data(stream_id, Bytes::from(vec![0u8; 40_000]), false)
        .unwrap();
    pump(&mut client, &mut server).unwrap();

    while server.read_data(stream_id).unwrap().is_some() {}
    pump(&mut server, &mut client).unwrap();

    let updates: Vec<u32> = drain_events(&mut client)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::WindowUpdate { stream_id: 0, increment } => Some(increment),
            _ => None,
        })
        .collect();
    assert_eq!(updates.iter().sum::<u32>(), 32_768);
    assert_eq!(client.flow().session_window(), 65_535 - 40_000 + 32_768);
}

#[test]
fn test_flow_control_blocked_event() {
    let (mut client, _server) = connected();
    let stream_id = client.send_request(&request("/"), None, false).unwrap();
    client
        .send_data(stream_id, Bytes::from(vec![0u8; 65_535]), false)
        .unwrap();
    drain_events(&mut client);

    assert_eq!(
        client
            .send_data(stream_id, Bytes::from_static(b"more"), false)
            .unwrap(),
        0
    );
    assert_eq!(
        drain_events(&mut client),
        vec![SessionEvent::FlowControlBlocked { stream_id }]
    );
}
