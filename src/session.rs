//! Sans-I/O HTTP/2 session.
//!
//! `Session` owns every piece of per-connection state: the frame reader,
//! both HPACK contexts, the stream table, flow-control windows and settings.
//! It never touches a socket. Feed it received bytes with [`Session::recv`],
//! collect bytes to transmit with [`Session::poll_output`] and observe what
//! happened through [`Session::poll_event`] or registered listeners.
//!
//! Frames are applied strictly in arrival order and outgoing frames leave in
//! the order they were queued, which keeps the HPACK tables of both peers in
//! step and HEADERS/CONTINUATION sequences contiguous.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::codec::H2Codec;
use crate::config::SessionConfig;
use crate::error::{ErrorCode, H2Error, Result};
use crate::flow_control::FlowControlManager;
use crate::frame::{frame_type, Frame, Priority, CONNECTION_PREFACE, MAX_STREAM_ID};
use crate::hpack::{header_list_size, HeaderField, HpackDecoder, HpackEncoder};
use crate::settings::{Settings, SettingsManager, DEFAULT_HEADER_TABLE_SIZE};
use crate::stream::{ActiveStreams, DataChunk, HeaderBlock, Stream, StreamState};

/// Which end of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Stream ids this role initiates: odd for clients, even for servers.
    pub fn is_local_id(self, stream_id: u32) -> bool {
        match self {
            Role::Client => stream_id % 2 == 1,
            Role::Server => stream_id % 2 == 0,
        }
    }

    fn first_stream_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// GOAWAY sent or received; existing streams run to completion.
    Draining,
    Closed(ErrorCode),
}

/// Something that happened while processing frames or application calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The peer opened a stream with HEADERS.
    StreamOpened { stream_id: u32 },
    /// A header block is ready for [`Session::take_headers`].
    Headers { stream_id: u32, end_stream: bool },
    /// A DATA payload is ready for [`Session::read_data`].
    Data {
        stream_id: u32,
        len: usize,
        end_stream: bool,
    },
    /// The stream was aborted, by the peer (`remote`) or locally.
    StreamReset {
        stream_id: u32,
        error_code: ErrorCode,
        remote: bool,
    },
    /// The stream completed normally and was removed.
    StreamClosed { stream_id: u32 },
    /// The peer reserved `promised_id` for a server push.
    PushPromise { stream_id: u32, promised_id: u32 },
    Settings { ack: bool },
    /// The peer sent a PING.
    Ping { payload: [u8; 8] },
    /// The peer answered one of our PINGs.
    Pong { payload: [u8; 8], rtt: Duration },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate { stream_id: u32, increment: u32 },
    /// A send was refused for lack of window; `stream_id` is the stream.
    FlowControlBlocked { stream_id: u32 },
    /// The session terminated.
    Closed { error_code: ErrorCode },
}

/// Synchronous observer of session events, called in dispatch order.
pub trait SessionListener: Send {
    fn on_event(&mut self, event: &SessionEvent);
}

impl<F> SessionListener for F
where
    F: FnMut(&SessionEvent) + Send,
{
    fn on_event(&mut self, event: &SessionEvent) {
        self(event)
    }
}

/// Handle returned by [`Session::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// One HTTP/2 connection's protocol state.
pub struct Session {
    role: Role,
    config: SessionConfig,
    state: SessionState,

    codec: H2Codec,
    encoder: HpackEncoder,
    decoder: HpackDecoder,
    streams: ActiveStreams,
    flow: FlowControlManager,
    settings: SettingsManager,

    preface_pending: bool,
    write_queue: VecDeque<Frame>,
    events: VecDeque<SessionEvent>,
    listeners: Vec<(ListenerId, Box<dyn SessionListener>)>,
    next_listener_id: u64,

    next_stream_id: u32,
    last_peer_stream_id: u32,
    pending_pings: VecDeque<([u8; 8], Instant)>,
    ping_counter: u64,
    goaway_sent: Option<u32>,
    goaway_received: Option<u32>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("streams", &self.streams.len())
            .field("next_stream_id", &self.next_stream_id)
            .field("last_peer_stream_id", &self.last_peer_stream_id)
            .field("queued_frames", &self.write_queue.len())
            .finish()
    }
}

impl Session {
    /// Client session: queues the connection preface and our SETTINGS.
    pub fn client(config: SessionConfig) -> Self {
        Self::new(Role::Client, config)
    }

    /// Server session: expects the client preface, queues our SETTINGS.
    pub fn server(config: SessionConfig) -> Self {
        Self::new(Role::Server, config)
    }

    pub fn new(role: Role, config: SessionConfig) -> Self {
        let local = config.settings.clone();

        let mut codec = match role {
            Role::Client => H2Codec::new(),
            Role::Server => H2Codec::server(),
        };
        codec.set_max_frame_size(local.max_frame_size);
        codec.set_max_header_block_size(config.max_header_block_size);

        let mut encoder = HpackEncoder::new();
        encoder.set_use_huffman(config.use_huffman);

        // Until our SETTINGS is acknowledged the peer may still use the default.
        let mut decoder = HpackDecoder::new();
        decoder.set_allowed_table_size(local.header_table_size.max(DEFAULT_HEADER_TABLE_SIZE) as usize);

        let flow = FlowControlManager::new(
            local.flow_control_options,
            local.initial_window_size,
            config.connection_window_size,
        );

        let mut session = Self {
            role,
            state: SessionState::Open,
            codec,
            encoder,
            decoder,
            streams: ActiveStreams::default(),
            flow,
            settings: SettingsManager::new(local.clone()),
            preface_pending: role == Role::Client,
            write_queue: VecDeque::new(),
            events: VecDeque::new(),
            listeners: Vec::new(),
            next_listener_id: 0,
            next_stream_id: role.first_stream_id(),
            last_peer_stream_id: 0,
            pending_pings: VecDeque::new(),
            ping_counter: 0,
            goaway_sent: None,
            goaway_received: None,
            config,
        };

        session.write_queue.push_back(Frame::settings(local.to_entries()));
        session.settings.on_settings_sent();
        if let Some(credit) = session.flow.initial_session_credit() {
            session.write_queue.push_back(Frame::window_update(0, credit));
        }
        session
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed(_))
    }

    pub fn is_draining(&self) -> bool {
        self.state == SessionState::Draining
    }

    /// Draining and every stream has been closed and read by the application.
    pub fn is_drained(&self) -> bool {
        self.is_draining() && self.streams.is_empty()
    }

    pub fn streams(&self) -> &ActiveStreams {
        &self.streams
    }

    pub fn stream(&self, stream_id: u32) -> Option<&Stream> {
        self.streams.get(stream_id)
    }

    pub fn flow(&self) -> &FlowControlManager {
        &self.flow
    }

    pub fn settings(&self) -> &SettingsManager {
        &self.settings
    }

    pub fn local_settings(&self) -> &Settings {
        self.settings.local()
    }

    pub fn peer_settings(&self) -> &Settings {
        self.settings.peer()
    }

    pub fn encoder(&self) -> &HpackEncoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &HpackDecoder {
        &self.decoder
    }

    pub fn next_stream_id(&self) -> u32 {
        self.next_stream_id
    }

    pub fn last_peer_stream_id(&self) -> u32 {
        self.last_peer_stream_id
    }

    /// Last stream id of the GOAWAY we sent, if any.
    pub fn goaway_sent(&self) -> Option<u32> {
        self.goaway_sent
    }

    /// Last stream id of the peer's GOAWAY, if any.
    pub fn goaway_received(&self) -> Option<u32> {
        self.goaway_received
    }

    /// Send capacity of a stream right now.
    pub fn send_capacity(&self, stream_id: u32) -> Result<usize> {
        let stream = self
            .streams
            .get(stream_id)
            .ok_or(H2Error::StreamNotFound(stream_id))?;
        Ok(self.flow.send_capacity(stream))
    }

    pub fn has_pending_output(&self) -> bool {
        self.preface_pending || !self.write_queue.is_empty()
    }

    /// Serialize every queued frame into `dst`; returns the bytes written.
    pub fn poll_output(&mut self, dst: &mut BytesMut) -> usize {
        let start = dst.len();
        if self.preface_pending {
            dst.extend_from_slice(CONNECTION_PREFACE);
            self.preface_pending = false;
        }
        while let Some(frame) = self.write_queue.pop_front() {
            trace!(
                stream_id = frame.stream_id(),
                frame_type = frame.frame_type(),
                "frame written"
            );
            frame.encode(dst);
        }
        dst.len() - start
    }

    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    pub fn add_listener(&mut self, listener: Box<dyn SessionListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns false when no listener had this id.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    fn emit(&mut self, event: SessionEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener.on_event(&event);
        }
        self.events.push_back(event);
    }

    fn queue(&mut self, frame: Frame) {
        self.write_queue.push_back(frame);
    }

    fn queue_window_updates(&mut self, updates: Vec<(u32, u32)>) {
        for (stream_id, increment) in updates {
            trace!(stream_id, increment, "WINDOW_UPDATE queued");
            self.queue(Frame::window_update(stream_id, increment));
        }
    }

    /// Feed bytes read from the transport.
    ///
    /// Frames are dispatched one at a time as they complete. Stream-level
    /// problems, including malformed frames scoped to one stream, are
    /// answered on the wire and do not fail the call; a connection error
    /// queues GOAWAY, closes the session and is returned.
    pub fn recv(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.codec.feed(data);

        loop {
            let frame = match self.codec.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(err) if err.is_fatal() => return Err(self.fail(err)),
                Err(err) => {
                    debug!(error = %err, "malformed frame answered with RST_STREAM");
                    self.recover(&err, false);
                    continue;
                }
            };
            match self.handle_frame(frame) {
                Ok(()) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => debug!(error = %err, "stream error handled"),
            }
        }
    }

    /// Apply one complete frame.
    ///
    /// Unlike [`Session::recv`], stream-level errors are returned to the
    /// caller (after being answered on the wire).
    pub fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        self.ensure_open()?;
        let stream_id = frame.stream_id();
        let ty = frame.frame_type();
        trace!(stream_id, frame_type = ty, "dispatching frame");

        match self.dispatch(frame) {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(self.fail(err)),
            Err(err) => {
                self.recover(&err, ty == frame_type::DATA || ty == frame_type::HEADERS);
                Err(err)
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        let flow_len = frame.flow_controlled_len();
        match frame {
            Frame::Data {
                stream_id,
                data,
                end_stream,
                ..
            } => self.on_data(stream_id, data, end_stream, flow_len),
            Frame::Headers {
                stream_id,
                block,
                priority,
                end_stream,
                ..
            } => self.on_headers(stream_id, &block, priority, end_stream),
            Frame::Priority {
                stream_id,
                priority,
            } => self.on_priority(stream_id, priority),
            Frame::RstStream {
                stream_id,
                error_code,
            } => self.on_rst_stream(stream_id, ErrorCode::from_u32(error_code)),
            Frame::Settings { ack, settings } => self.on_settings(ack, &settings),
            Frame::PushPromise {
                stream_id,
                promised_id,
                block,
                ..
            } => self.on_push_promise(stream_id, promised_id, &block),
            Frame::Ping { ack, data } => {
                self.on_ping(ack, data);
                Ok(())
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                self.on_go_away(last_stream_id, ErrorCode::from_u32(error_code), debug_data);
                Ok(())
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.on_window_update(stream_id, increment),
            Frame::Continuation { stream_id, .. } => Err(H2Error::protocol(format!(
                "Unexpected CONTINUATION frame for stream {}",
                stream_id
            ))),
            Frame::Unknown { .. } => Ok(()),
        }
    }

    /// Answer a stream-level error on the wire. `answer_missing` is set for
    /// frames that still get RST_STREAM when their stream is gone.
    fn recover(&mut self, err: &H2Error, answer_missing: bool) {
        match err {
            H2Error::Stream {
                stream_id, code, ..
            } => self.reset_local(*stream_id, *code),
            H2Error::RefusedStream(stream_id) => {
                self.queue(Frame::rst_stream(*stream_id, ErrorCode::RefusedStream));
            }
            // Never answer RST_STREAM/WINDOW_UPDATE/PRIORITY on a closed
            // stream: that could loop between peers.
            H2Error::StreamNotFound(stream_id) if answer_missing => {
                self.queue(Frame::rst_stream(*stream_id, ErrorCode::StreamClosed));
            }
            _ => {}
        }
    }

    /// A stream id that has not been used yet by its initiator.
    fn is_idle(&self, stream_id: u32) -> bool {
        if self.role.is_local_id(stream_id) {
            stream_id >= self.next_stream_id
        } else {
            stream_id > self.last_peer_stream_id
        }
    }

    fn on_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool, flow_len: usize) -> Result<()> {
        if self.is_idle(stream_id) {
            return Err(H2Error::protocol(format!("DATA on idle stream {}", stream_id)));
        }

        let Some(stream) = self.streams.get_mut(stream_id) else {
            self.discard_data(flow_len)?;
            return Err(H2Error::StreamNotFound(stream_id));
        };
        if !stream.state().can_recv_data() {
            self.discard_data(flow_len)?;
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::StreamClosed,
                "DATA on a stream that is not open for receiving",
            ));
        }
        if let Err(err) = self.flow.on_data_frame_received(Some(&mut *stream), flow_len) {
            if !err.is_fatal() {
                let updates = self.flow.on_data_consumed(None, flow_len);
                self.queue_window_updates(updates);
            }
            return Err(err);
        }

        let len = data.len();
        if len > 0 || end_stream {
            stream.push_data(DataChunk { data, end_stream });
        }
        if end_stream {
            stream.recv_end_stream();
        }
        trace!(stream_id, len, end_stream, window = stream.recv_window(), "DATA received");

        // Padding never reaches the application; credit it right away.
        let padding = flow_len - len;
        if padding > 0 {
            let updates = self.flow.on_data_consumed(self.streams.get_mut(stream_id), padding);
            self.queue_window_updates(updates);
        }

        self.emit(SessionEvent::Data {
            stream_id,
            len,
            end_stream,
        });
        Ok(())
    }

    /// Account for DATA that will never be delivered.
    fn discard_data(&mut self, flow_len: usize) -> Result<()> {
        self.flow.on_data_frame_received(None, flow_len)?;
        let updates = self.flow.on_data_consumed(None, flow_len);
        self.queue_window_updates(updates);
        Ok(())
    }

    fn on_headers(
        &mut self,
        stream_id: u32,
        block: &[u8],
        priority: Option<Priority>,
        end_stream: bool,
    ) -> Result<()> {
        // Decode before anything else so the compression context stays in
        // step even when the stream is refused or already gone.
        let fields = self.decoder.decompress(block)?;

        if priority.is_some_and(|p| p.dependency == stream_id) {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "stream depends on itself",
            ));
        }

        if self.streams.contains(stream_id) {
            self.check_header_block(stream_id, &fields)?;
            return self.on_stream_headers(stream_id, fields, priority, end_stream);
        }

        if self.role.is_local_id(stream_id) {
            if self.is_idle(stream_id) {
                return Err(H2Error::protocol(format!(
                    "HEADERS on idle stream {}",
                    stream_id
                )));
            }
            return Err(H2Error::StreamNotFound(stream_id));
        }
        if stream_id <= self.last_peer_stream_id {
            return Err(H2Error::StreamNotFound(stream_id));
        }
        if self.role == Role::Client {
            return Err(H2Error::protocol(format!(
                "server opened stream {} without PUSH_PROMISE",
                stream_id
            )));
        }

        self.last_peer_stream_id = stream_id;
        if self.goaway_sent.is_some() {
            debug!(stream_id, "refusing stream after GOAWAY");
            return Err(H2Error::RefusedStream(stream_id));
        }
        self.check_header_block(stream_id, &fields)?;
        let local_max = self.settings.local().max_concurrent_streams;
        if self.streams.active_count() as u64 >= u64::from(local_max) {
            debug!(stream_id, local_max, "refusing stream over local limit");
            return Err(H2Error::RefusedStream(stream_id));
        }

        let mut stream = self.flow.new_stream(stream_id);
        if let Some(priority) = priority {
            stream.set_priority(priority);
        }
        if let Err(err) = self.streams.insert(stream) {
            debug!(stream_id, "refusing stream over peer-advertised limit");
            return Err(err);
        }
        debug!(stream_id, end_stream, "peer opened stream");
        self.emit(SessionEvent::StreamOpened { stream_id });
        self.on_stream_headers(stream_id, fields, None, end_stream)
    }

    fn on_stream_headers(
        &mut self,
        stream_id: u32,
        fields: Vec<HeaderField>,
        priority: Option<Priority>,
        end_stream: bool,
    ) -> Result<()> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(H2Error::StreamNotFound(stream_id))?;
        stream.recv_headers(end_stream)?;
        if let Some(priority) = priority {
            stream.set_priority(priority);
        }
        stream.push_headers(HeaderBlock { fields, end_stream });
        if end_stream {
            stream.push_data(DataChunk {
                data: Bytes::new(),
                end_stream: true,
            });
        }
        self.emit(SessionEvent::Headers {
            stream_id,
            end_stream,
        });
        Ok(())
    }

    /// Pseudo-headers first, and the list within our advertised bound.
    fn check_header_block(&self, stream_id: u32, fields: &[HeaderField]) -> Result<()> {
        let mut regular_seen = false;
        for field in fields {
            if field.is_pseudo() {
                if regular_seen {
                    return Err(H2Error::stream(
                        stream_id,
                        ErrorCode::ProtocolError,
                        format!("pseudo-header {} after regular header", field.name),
                    ));
                }
            } else {
                regular_seen = true;
            }
        }

        let limit = self.settings.local().max_header_list_size;
        if header_list_size(fields) as u64 > u64::from(limit) {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "header list exceeds SETTINGS_MAX_HEADER_LIST_SIZE",
            ));
        }
        Ok(())
    }

    fn on_priority(&mut self, stream_id: u32, priority: Priority) -> Result<()> {
        if priority.dependency == stream_id {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "stream depends on itself",
            ));
        }
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.set_priority(priority);
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, stream_id: u32, code: ErrorCode) -> Result<()> {
        if self.is_idle(stream_id) {
            return Err(H2Error::protocol(format!(
                "RST_STREAM on idle stream {}",
                stream_id
            )));
        }
        let Some(stream) = self.streams.get_mut(stream_id) else {
            return Err(H2Error::StreamNotFound(stream_id));
        };
        let dropped = stream.reset(code);
        self.streams.remove(stream_id);
        let updates = self.flow.on_data_consumed(None, dropped);
        self.queue_window_updates(updates);

        debug!(stream_id, %code, "stream reset by peer");
        self.emit(SessionEvent::StreamReset {
            stream_id,
            error_code: code,
            remote: true,
        });
        Ok(())
    }

    fn on_settings(&mut self, ack: bool, entries: &[(u16, u32)]) -> Result<()> {
        if ack {
            if self.settings.on_ack_received() {
                let size = self.settings.local().header_table_size as usize;
                self.decoder.set_allowed_table_size(size);
            }
            self.emit(SessionEvent::Settings { ack: true });
            return Ok(());
        }

        let changes = self
            .settings
            .apply_settings(entries, &mut self.streams, &mut self.flow)?;
        if let Some(size) = changes.header_table_size {
            self.encoder
                .set_max_table_size(size.min(DEFAULT_HEADER_TABLE_SIZE) as usize);
        }
        if self.config.auto_settings_ack {
            self.queue(Frame::settings_ack());
        }
        self.emit(SessionEvent::Settings { ack: false });
        Ok(())
    }

    fn on_push_promise(&mut self, stream_id: u32, promised_id: u32, block: &[u8]) -> Result<()> {
        let fields = self.decoder.decompress(block)?;

        if self.role == Role::Server {
            return Err(H2Error::protocol("PUSH_PROMISE sent to a server"));
        }
        if !self.settings.local().enable_push {
            return Err(H2Error::protocol("PUSH_PROMISE while push is disabled"));
        }
        if promised_id == 0 || promised_id % 2 != 0 || promised_id <= self.last_peer_stream_id {
            return Err(H2Error::protocol(format!(
                "invalid promised stream id {}",
                promised_id
            )));
        }
        self.last_peer_stream_id = promised_id;

        let Some(associated) = self.streams.get(stream_id) else {
            return Err(H2Error::StreamNotFound(stream_id));
        };
        if !matches!(
            associated.state(),
            StreamState::Open | StreamState::HalfClosedLocal
        ) {
            return Err(H2Error::protocol(format!(
                "PUSH_PROMISE on stream {} in state {:?}",
                stream_id,
                associated.state()
            )));
        }

        let mut promised = self.flow.new_stream(promised_id);
        promised.reserve(false);
        promised.push_headers(HeaderBlock {
            fields,
            end_stream: false,
        });
        self.streams.insert_reserved(promised);

        debug!(stream_id, promised_id, "push promised");
        self.emit(SessionEvent::PushPromise {
            stream_id,
            promised_id,
        });
        Ok(())
    }

    fn on_ping(&mut self, ack: bool, payload: [u8; 8]) {
        if !ack {
            if self.config.auto_ping_ack {
                self.queue(Frame::ping_ack(payload));
            }
            self.emit(SessionEvent::Ping { payload });
            return;
        }

        match self.pending_pings.iter().position(|(p, _)| *p == payload) {
            Some(i) => {
                if let Some((_, sent_at)) = self.pending_pings.remove(i) {
                    let rtt = sent_at.elapsed();
                    trace!(?rtt, "PING acknowledged");
                    self.emit(SessionEvent::Pong { payload, rtt });
                }
            }
            None => debug!("ignoring unsolicited PING ACK"),
        }
    }

    fn on_go_away(&mut self, last_stream_id: u32, code: ErrorCode, debug_data: Bytes) {
        if code == ErrorCode::NoError {
            debug!(last_stream_id, "GOAWAY received");
        } else {
            warn!(last_stream_id, %code, "GOAWAY received with error");
        }
        self.goaway_received = Some(last_stream_id);
        if self.state == SessionState::Open {
            self.state = SessionState::Draining;
        }

        // Our streams above last_stream_id were never processed by the peer.
        let role = self.role;
        let refused: Vec<u32> = self
            .streams
            .ids()
            .into_iter()
            .filter(|id| role.is_local_id(*id) && *id > last_stream_id)
            .collect();
        for stream_id in refused {
            if let Some(stream) = self.streams.get_mut(stream_id) {
                stream.reset(ErrorCode::RefusedStream);
            }
            self.streams.remove(stream_id);
            self.emit(SessionEvent::StreamReset {
                stream_id,
                error_code: ErrorCode::RefusedStream,
                remote: true,
            });
        }

        self.emit(SessionEvent::GoAway {
            last_stream_id,
            error_code: code,
            debug_data,
        });
    }

    fn on_window_update(&mut self, stream_id: u32, increment: u32) -> Result<()> {
        if stream_id != 0 && self.is_idle(stream_id) {
            return Err(H2Error::protocol(format!(
                "WINDOW_UPDATE on idle stream {}",
                stream_id
            )));
        }
        self.flow
            .on_window_update_received(&mut self.streams, stream_id, increment)?;
        self.emit(SessionEvent::WindowUpdate {
            stream_id,
            increment,
        });
        Ok(())
    }

    /// Open a new stream with a request header block. Returns its id.
    pub fn send_request(
        &mut self,
        headers: &[HeaderField],
        priority: Option<Priority>,
        end_stream: bool,
    ) -> Result<u32> {
        self.ensure_open()?;
        if self.role != Role::Client {
            return Err(H2Error::stream(0, ErrorCode::ProtocolError, "only clients send requests"));
        }
        let stream_id = self.next_stream_id;
        if self.is_draining() || stream_id > MAX_STREAM_ID {
            return Err(H2Error::RefusedStream(stream_id));
        }

        let mut stream = self.flow.new_stream(stream_id);
        if let Some(priority) = priority {
            stream.set_priority(priority);
        }
        self.streams.insert(stream)?;
        self.next_stream_id += 2;

        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.send_headers(end_stream)?;
        }
        let block = self.encoder.compress(headers);
        let overhead = if priority.is_some() { 5 } else { 0 };
        self.queue_header_block(stream_id, block, overhead, |block, end_headers| Frame::Headers {
            stream_id,
            block,
            priority,
            end_stream,
            end_headers,
        });

        debug!(stream_id, end_stream, "request sent");
        Ok(stream_id)
    }

    /// Send a header block on an existing stream (response, informational,
    /// or the headers of a promised stream).
    pub fn send_headers(&mut self, stream_id: u32, headers: &[HeaderField], end_stream: bool) -> Result<()> {
        self.ensure_open()?;
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(H2Error::StreamNotFound(stream_id))?;
        stream.send_headers(end_stream)?;

        let block = self.encoder.compress(headers);
        self.queue_header_block(stream_id, block, 0, |block, end_headers| Frame::Headers {
            stream_id,
            block,
            priority: None,
            end_stream,
            end_headers,
        });
        trace!(stream_id, end_stream, "headers sent");
        self.maybe_dispose(stream_id);
        Ok(())
    }

    /// Send trailers, closing our side of the stream.
    pub fn send_trailers(&mut self, stream_id: u32, trailers: &[HeaderField]) -> Result<()> {
        let sendable = self
            .streams
            .get(stream_id)
            .ok_or(H2Error::StreamNotFound(stream_id))?
            .state()
            .can_send_data();
        if !sendable {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::StreamClosed,
                "trailers on a stream that is not open for sending",
            ));
        }
        self.send_headers(stream_id, trailers, true)
    }

    /// Queue DATA within the available flow-control window.
    ///
    /// Returns how many bytes of `data` were accepted; 0 means the stream or
    /// session window is exhausted. END_STREAM is only sent once all of
    /// `data` has been accepted.
    pub fn send_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<usize> {
        self.ensure_open()?;
        let stream = self
            .streams
            .get(stream_id)
            .ok_or(H2Error::StreamNotFound(stream_id))?;
        if !stream.state().can_send_data() {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::StreamClosed,
                "DATA on a stream that is not open for sending",
            ));
        }

        let len = data.len();
        if len == 0 && !end_stream {
            return Ok(0);
        }
        let capacity = self.flow.send_capacity(stream);
        if len > 0 && capacity == 0 {
            debug!(stream_id, "send blocked by flow control");
            self.emit(SessionEvent::FlowControlBlocked { stream_id });
            return Ok(0);
        }

        let accepted = len.min(capacity);
        let finished = end_stream && accepted == len;
        let max_frame = self.settings.peer().max_frame_size as usize;
        let mut remaining = data.slice(..accepted);
        loop {
            let chunk = remaining.split_to(remaining.len().min(max_frame));
            let last = remaining.is_empty();
            self.flow
                .on_data_frame_sent(&mut self.streams, stream_id, chunk.len());
            self.queue(Frame::Data {
                stream_id,
                data: chunk,
                end_stream: finished && last,
                padding: None,
            });
            if last {
                break;
            }
        }

        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.record_sent(accepted);
            if finished {
                stream.send_end_stream();
            }
            trace!(stream_id, accepted, window = stream.send_window(), "DATA queued");
        }
        self.maybe_dispose(stream_id);
        Ok(accepted)
    }

    /// Reserve a stream for a server push associated with `stream_id`.
    /// Returns the promised stream id; send its response with
    /// [`Session::send_headers`].
    pub fn push_promise(&mut self, stream_id: u32, request: &[HeaderField]) -> Result<u32> {
        self.ensure_open()?;
        if self.role != Role::Server {
            return Err(H2Error::stream(stream_id, ErrorCode::ProtocolError, "only servers push"));
        }
        if !self.settings.peer().enable_push {
            return Err(H2Error::stream(stream_id, ErrorCode::RefusedStream, "peer disabled push"));
        }
        let associated = self
            .streams
            .get(stream_id)
            .ok_or(H2Error::StreamNotFound(stream_id))?;
        if !matches!(
            associated.state(),
            StreamState::Open | StreamState::HalfClosedRemote
        ) {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::StreamClosed,
                "push on a stream that is not open",
            ));
        }
        let promised_id = self.next_stream_id;
        if self.is_draining() || promised_id > MAX_STREAM_ID {
            return Err(H2Error::RefusedStream(promised_id));
        }
        self.next_stream_id += 2;

        let mut promised = self.flow.new_stream(promised_id);
        promised.reserve(true);
        self.streams.insert_reserved(promised);

        let block = self.encoder.compress(request);
        self.queue_header_block(stream_id, block, 4, |block, end_headers| Frame::PushPromise {
            stream_id,
            promised_id,
            block,
            end_headers,
        });
        debug!(stream_id, promised_id, "push promise sent");
        Ok(promised_id)
    }

    /// Abort a stream with RST_STREAM.
    pub fn reset_stream(&mut self, stream_id: u32, code: ErrorCode) -> Result<()> {
        self.ensure_open()?;
        if !self.streams.contains(stream_id) {
            return Err(H2Error::StreamNotFound(stream_id));
        }
        self.reset_local(stream_id, code);
        Ok(())
    }

    /// Queue a PING; the matching ACK produces [`SessionEvent::Pong`].
    pub fn ping(&mut self) -> Result<[u8; 8]> {
        self.ensure_open()?;
        self.ping_counter += 1;
        let payload = self.ping_counter.to_be_bytes();
        self.pending_pings.push_back((payload, Instant::now()));
        self.queue(Frame::ping(payload));
        Ok(payload)
    }

    /// Acknowledge the peer's SETTINGS when auto-ACK is off.
    pub fn ack_settings(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.queue(Frame::settings_ack());
        Ok(())
    }

    /// Send GOAWAY. With NO_ERROR the session drains; any other code closes it.
    pub fn go_away(&mut self, code: ErrorCode, debug_data: Bytes) -> Result<()> {
        self.ensure_open()?;
        let last_stream_id = self.last_peer_stream_id;
        self.queue(Frame::go_away(last_stream_id, code, debug_data));
        self.goaway_sent = Some(last_stream_id);
        debug!(last_stream_id, %code, "GOAWAY sent");

        if code == ErrorCode::NoError {
            if self.state == SessionState::Open {
                self.state = SessionState::Draining;
            }
        } else {
            self.terminate(code);
        }
        Ok(())
    }

    /// Next received DATA chunk of a stream, releasing its receive credit.
    /// `Ok(None)` means nothing is buffered yet.
    pub fn read_data(&mut self, stream_id: u32) -> Result<Option<DataChunk>> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(H2Error::StreamNotFound(stream_id))?;
        let Some(chunk) = stream.pop_data() else {
            return Ok(None);
        };
        let updates = self.flow.on_data_consumed(Some(stream), chunk.data.len());
        self.queue_window_updates(updates);
        self.maybe_dispose(stream_id);
        Ok(Some(chunk))
    }

    /// Next received header block of a stream.
    pub fn take_headers(&mut self, stream_id: u32) -> Result<Option<HeaderBlock>> {
        let block = self
            .streams
            .get_mut(stream_id)
            .ok_or(H2Error::StreamNotFound(stream_id))?
            .pop_headers();
        if block.is_some() {
            self.maybe_dispose(stream_id);
        }
        Ok(block)
    }

    /// The application is done with a stream: drop unread buffers of a
    /// closed stream and remove it.
    pub fn release_stream(&mut self, stream_id: u32) {
        let Some(stream) = self.streams.get_mut(stream_id) else {
            return;
        };
        if stream.state() != StreamState::Closed {
            return;
        }
        let dropped = stream.discard_buffers();
        let updates = self.flow.on_data_consumed(None, dropped);
        self.queue_window_updates(updates);
        self.maybe_dispose(stream_id);
    }

    /// Terminate without GOAWAY (transport lost or cancelled).
    pub fn close(&mut self, code: ErrorCode) {
        if !self.is_closed() {
            self.terminate(code);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Closed(code) => Err(H2Error::SessionClosed(code)),
            _ => Ok(()),
        }
    }

    fn queue_header_block<F>(&mut self, stream_id: u32, mut block: Bytes, overhead: usize, first: F)
    where
        F: FnOnce(Bytes, bool) -> Frame,
    {
        let max = self.settings.peer().max_frame_size as usize;
        let head = block.split_to(block.len().min(max - overhead));
        self.queue(first(head, block.is_empty()));
        while !block.is_empty() {
            let fragment = block.split_to(block.len().min(max));
            self.queue(Frame::continuation(stream_id, fragment, block.is_empty()));
        }
    }

    fn reset_local(&mut self, stream_id: u32, code: ErrorCode) {
        self.queue(Frame::rst_stream(stream_id, code));
        let Some(stream) = self.streams.get_mut(stream_id) else {
            return;
        };
        let dropped = stream.reset(code);
        self.streams.remove(stream_id);
        let updates = self.flow.on_data_consumed(None, dropped);
        self.queue_window_updates(updates);

        debug!(stream_id, %code, "stream reset");
        self.emit(SessionEvent::StreamReset {
            stream_id,
            error_code: code,
            remote: false,
        });
    }

    fn maybe_dispose(&mut self, stream_id: u32) {
        if self.streams.get(stream_id).is_some_and(Stream::is_finished) {
            self.streams.remove(stream_id);
            trace!(stream_id, "stream disposed");
            self.emit(SessionEvent::StreamClosed { stream_id });
        }
    }

    /// Fatal error: GOAWAY with the error's code, then close.
    fn fail(&mut self, err: H2Error) -> H2Error {
        if self.is_closed() {
            return err;
        }
        let code = err.code();
        warn!(error = %err, %code, "connection error, sending GOAWAY");
        let last_stream_id = self.last_peer_stream_id;
        self.queue(Frame::go_away(
            last_stream_id,
            code,
            Bytes::from(err.to_string()),
        ));
        self.goaway_sent = Some(last_stream_id);
        self.terminate(code);
        err
    }

    fn terminate(&mut self, code: ErrorCode) {
        self.state = SessionState::Closed(code);
        self.pending_pings.clear();
        // Fully received streams stay readable until the application is done.
        let aborted: Vec<u32> = self
            .streams
            .iter()
            .filter(|stream| stream.state() != StreamState::Closed)
            .map(Stream::id)
            .collect();
        for stream_id in aborted {
            self.streams.remove(stream_id);
            self.emit(SessionEvent::StreamReset {
                stream_id,
                error_code: code,
                remote: false,
            });
        }
        debug!(%code, "session closed");
        self.emit(SessionEvent::Closed { error_code: code });
    }
}
