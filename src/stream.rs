//! Per-stream state and the active streams collection.

use std::collections::hash_map::{self, HashMap};
use std::collections::VecDeque;

use bytes::Bytes;
use tracing::trace;

use crate::error::{ErrorCode, H2Error, Result};
use crate::frame::Priority;
use crate::hpack::HeadersList;

/// Stream state per RFC 7540 Section 5.1.
///
/// ```text
///                          +--------+
///                  send PP |        | recv PP
///                 ,--------|  idle  |--------.
///                /         |        |         \
///               v          +--------+          v
///        +----------+          |           +----------+
///        |          |          | send H /  |          |
/// ,------| reserved |          | recv H    | reserved |------.
/// |      | (local)  |          |           | (remote) |      |
/// |      +----------+          v           +----------+      |
/// |          |             +--------+             |          |
/// |          |     recv ES |        | send ES     |          |
/// |   send H |     ,-------|  open  |-------.     | recv H   |
/// |          |    /        |        |        \    |          |
/// |          v   v         +--------+         v   v          |
/// |      +----------+          |           +----------+      |
/// |      |   half   |          |           |   half   |      |
/// |      |  closed  |          | send R /  |  closed  |      |
/// |      | (remote) |          | recv R    | (local)  |      |
/// |      +----------+          |           +----------+      |
/// |           |                |                 |           |
/// |           | send ES /      |       recv ES / |           |
/// |           | send R /       v        send R / |           |
/// |           | recv R     +--------+   recv R   |           |
/// | send R /  `----------->|        |<-----------'  send R / |
/// | recv R                 | closed |               recv R   |
/// `----------------------->|        |<----------------------'
///                          +--------+
/// ```
///
/// `Disposed` follows `Closed` once the stream has been removed from the
/// collection and nothing refers to its buffers any more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
    Disposed,
}

impl StreamState {
    /// Counts against the concurrency ceiling.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            StreamState::Open | StreamState::HalfClosedLocal | StreamState::HalfClosedRemote
        )
    }

    pub fn can_send_data(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    pub fn can_recv_data(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Disposed)
    }
}

/// A received DATA payload, queued until the application reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub data: Bytes,
    pub end_stream: bool,
}

/// A decoded header block (initial headers, informational, or trailers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    pub fields: HeadersList,
    pub end_stream: bool,
}

/// One HTTP/2 stream.
#[derive(Debug)]
pub struct Stream {
    id: u32,
    state: StreamState,
    pub(crate) send_window: i32,
    pub(crate) recv_window: i32,
    /// Bytes handed to the application and not yet credited back to the peer.
    pub(crate) recv_unacked: u32,
    pub(crate) flow_controlled: bool,
    pub(crate) flow_control_blocked: bool,
    priority: Option<Priority>,
    headers: VecDeque<HeaderBlock>,
    data: VecDeque<DataChunk>,
    bytes_sent: u64,
    bytes_received: u64,
    reset_code: Option<ErrorCode>,
}

impl Stream {
    pub fn new(id: u32, send_window: i32, recv_window: i32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window,
            recv_window,
            recv_unacked: 0,
            flow_controlled: true,
            flow_control_blocked: false,
            priority: None,
            headers: VecDeque::new(),
            data: VecDeque::new(),
            bytes_sent: 0,
            bytes_received: 0,
            reset_code: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn send_window(&self) -> i32 {
        self.send_window
    }

    pub fn recv_window(&self) -> i32 {
        self.recv_window
    }

    pub fn is_flow_controlled(&self) -> bool {
        self.flow_controlled
    }

    pub fn is_flow_control_blocked(&self) -> bool {
        self.flow_control_blocked
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = Some(priority);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn reset_code(&self) -> Option<ErrorCode> {
        self.reset_code
    }

    /// Mark a pushed stream as promised by us or by the peer.
    pub fn reserve(&mut self, local: bool) {
        self.state = if local {
            StreamState::ReservedLocal
        } else {
            StreamState::ReservedRemote
        };
    }

    /// Transition for a HEADERS frame we send.
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        self.state = match self.state {
            StreamState::Idle => StreamState::Open,
            StreamState::ReservedLocal => StreamState::HalfClosedRemote,
            StreamState::Open | StreamState::HalfClosedRemote => self.state,
            other => return Err(self.closed_error("send HEADERS", other)),
        };
        if end_stream {
            self.send_end_stream();
        }
        Ok(())
    }

    /// Transition for a HEADERS frame we receive.
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<()> {
        self.state = match self.state {
            StreamState::Idle => StreamState::Open,
            StreamState::ReservedRemote => StreamState::HalfClosedLocal,
            StreamState::Open | StreamState::HalfClosedLocal => self.state,
            other => return Err(self.closed_error("receive HEADERS", other)),
        };
        if end_stream {
            self.recv_end_stream();
        }
        Ok(())
    }

    pub fn send_end_stream(&mut self) {
        let prev = self.state;
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
        trace!(stream_id = self.id, from = ?prev, to = ?self.state, "END_STREAM sent");
    }

    pub fn recv_end_stream(&mut self) {
        let prev = self.state;
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
        trace!(stream_id = self.id, from = ?prev, to = ?self.state, "END_STREAM received");
    }

    /// Abort the stream. Buffered frames are dropped; returns the number of
    /// DATA bytes discarded so their receive credit can be released.
    pub fn reset(&mut self, code: ErrorCode) -> usize {
        self.state = StreamState::Closed;
        self.reset_code = Some(code);
        self.discard_buffers()
    }

    /// Drop everything queued for the application; returns the DATA bytes dropped.
    pub fn discard_buffers(&mut self) -> usize {
        self.headers.clear();
        self.data.drain(..).map(|c| c.data.len()).sum()
    }

    pub(crate) fn dispose(&mut self) {
        self.state = StreamState::Disposed;
    }

    pub(crate) fn record_sent(&mut self, len: usize) {
        self.bytes_sent += len as u64;
    }

    pub(crate) fn push_data(&mut self, chunk: DataChunk) {
        self.bytes_received += chunk.data.len() as u64;
        self.data.push_back(chunk);
    }

    pub fn pop_data(&mut self) -> Option<DataChunk> {
        self.data.pop_front()
    }

    pub(crate) fn push_headers(&mut self, block: HeaderBlock) {
        self.headers.push_back(block);
    }

    pub fn pop_headers(&mut self) -> Option<HeaderBlock> {
        self.headers.pop_front()
    }

    /// Number of DATA chunks waiting for the application.
    pub fn buffered_chunks(&self) -> usize {
        self.data.len()
    }

    /// Closed with nothing left for the application to read.
    pub fn is_finished(&self) -> bool {
        self.state == StreamState::Closed && self.data.is_empty() && self.headers.is_empty()
    }

    fn closed_error(&self, what: &str, state: StreamState) -> H2Error {
        H2Error::stream(
            self.id,
            ErrorCode::StreamClosed,
            format!("cannot {} in state {:?}", what, state),
        )
    }
}

/// Arena of streams keyed by id.
#[derive(Debug)]
pub struct ActiveStreams {
    streams: HashMap<u32, Stream>,
    max_concurrent_streams: u32,
}

impl Default for ActiveStreams {
    fn default() -> Self {
        Self::new(u32::MAX)
    }
}

impl ActiveStreams {
    pub fn new(max_concurrent_streams: u32) -> Self {
        Self {
            streams: HashMap::new(),
            max_concurrent_streams,
        }
    }

    pub fn max_concurrent_streams(&self) -> u32 {
        self.max_concurrent_streams
    }

    pub fn set_max_concurrent_streams(&mut self, max: u32) {
        self.max_concurrent_streams = max;
    }

    /// Streams counting against the ceiling.
    pub fn active_count(&self) -> usize {
        self.streams.values().filter(|s| s.state.is_active()).count()
    }

    /// True when one more stream may be opened.
    pub fn has_capacity(&self) -> bool {
        (self.active_count() as u64) < u64::from(self.max_concurrent_streams)
    }

    /// Admit a stream, refusing it when the ceiling is reached.
    pub fn insert(&mut self, stream: Stream) -> Result<()> {
        if !self.has_capacity() {
            return Err(H2Error::RefusedStream(stream.id));
        }
        self.insert_reserved(stream);
        Ok(())
    }

    /// Admit a stream without the ceiling check (reserved push streams).
    pub fn insert_reserved(&mut self, stream: Stream) {
        self.streams.insert(stream.id, stream);
    }

    pub fn get(&self, id: u32) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.streams.contains_key(&id)
    }

    /// Remove a stream; it is marked `Disposed` on the way out.
    pub fn remove(&mut self, id: u32) -> Option<Stream> {
        self.streams.remove(&id).map(|mut s| {
            s.dispose();
            s
        })
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.streams.keys().copied().collect()
    }

    pub fn flow_controlled_ids(&self) -> Vec<u32> {
        self.streams
            .values()
            .filter(|s| s.flow_controlled)
            .map(|s| s.id)
            .collect()
    }

    pub fn iter(&self) -> hash_map::Values<'_, u32, Stream> {
        self.streams.values()
    }

    pub fn iter_mut(&mut self) -> hash_map::ValuesMut<'_, u32, Stream> {
        self.streams.values_mut()
    }
}
