//! HTTP/2 flow control (RFC 7540 Section 5.2 and 6.9).
//!
//! Send windows are debited when DATA is queued and credited by the peer's
//! WINDOW_UPDATE frames; they are `i32` because a SETTINGS change to
//! INITIAL_WINDOW_SIZE can push a stream window below zero. Receive windows
//! are debited when DATA arrives and replenished once the application has
//! consumed half of the initial window.

use tracing::{debug, trace};

use crate::error::{ErrorCode, H2Error, Result};
use crate::stream::{ActiveStreams, Stream};

/// Default initial window size (RFC 7540 Section 6.9.2).
pub const DEFAULT_INITIAL_WINDOW_SIZE: i32 = 65_535;

/// Largest legal window (2^31 - 1).
pub const MAX_WINDOW_SIZE: i32 = i32::MAX;

/// Flow-control policy bits (draft SETTINGS_FLOW_CONTROL_OPTIONS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowControlOptions(u32);

impl FlowControlOptions {
    /// Bit 0: flow control is off for the session and every stream.
    pub const DISABLE_FLOW_CONTROL: u32 = 0x1;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn disabled() -> Self {
        Self(Self::DISABLE_FLOW_CONTROL)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_flow_control_disabled(self) -> bool {
        self.0 & Self::DISABLE_FLOW_CONTROL != 0
    }
}

/// Session-wide flow-control bookkeeping.
#[derive(Debug)]
pub struct FlowControlManager {
    /// Our policy, fixed at construction.
    local_options: FlowControlOptions,
    /// The peer's policy, latched from its first SETTINGS frame.
    peer_options: Option<FlowControlOptions>,

    session_initial_window: i32,
    /// Peer's SETTINGS_INITIAL_WINDOW_SIZE: initial send window for streams.
    streams_initial_window: i32,
    session_window: i32,
    session_blocked: bool,
    total_sent: u64,
    total_credited: u64,

    /// Our SETTINGS_INITIAL_WINDOW_SIZE: initial receive window for streams.
    stream_recv_initial: i32,
    session_recv_initial: i32,
    session_recv_window: i32,
    session_recv_unacked: u32,
}

impl Default for FlowControlManager {
    fn default() -> Self {
        Self::new(
            FlowControlOptions::default(),
            DEFAULT_INITIAL_WINDOW_SIZE as u32,
            DEFAULT_INITIAL_WINDOW_SIZE as u32,
        )
    }
}

impl FlowControlManager {
    /// `stream_recv_window` is our advertised INITIAL_WINDOW_SIZE and
    /// `session_recv_window` the connection window we grant the peer.
    pub fn new(
        local_options: FlowControlOptions,
        stream_recv_window: u32,
        session_recv_window: u32,
    ) -> Self {
        let stream_recv_initial = clamp_window(stream_recv_window);
        let session_recv_initial = clamp_window(session_recv_window);
        Self {
            local_options,
            peer_options: None,
            session_initial_window: DEFAULT_INITIAL_WINDOW_SIZE,
            streams_initial_window: DEFAULT_INITIAL_WINDOW_SIZE,
            session_window: DEFAULT_INITIAL_WINDOW_SIZE,
            session_blocked: false,
            total_sent: 0,
            total_credited: 0,
            stream_recv_initial,
            session_recv_initial,
            // The connection receive window always starts at the RFC default;
            // anything larger is granted with a WINDOW_UPDATE.
            session_recv_window: DEFAULT_INITIAL_WINDOW_SIZE,
            session_recv_unacked: 0,
        }
    }

    pub fn local_options(&self) -> FlowControlOptions {
        self.local_options
    }

    pub fn peer_options(&self) -> Option<FlowControlOptions> {
        self.peer_options
    }

    pub fn session_initial_window(&self) -> i32 {
        self.session_initial_window
    }

    pub fn streams_initial_window(&self) -> i32 {
        self.streams_initial_window
    }

    /// Current session send window.
    pub fn session_window(&self) -> i32 {
        self.session_window
    }

    pub fn session_recv_window(&self) -> i32 {
        self.session_recv_window
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    pub fn total_credited(&self) -> u64 {
        self.total_credited
    }

    pub fn is_session_flow_control_blocked(&self) -> bool {
        self.session_blocked
    }

    /// Our sends are limited by windows unless the peer switched flow
    /// control off.
    pub fn is_session_flow_controlled(&self) -> bool {
        !self
            .peer_options
            .is_some_and(FlowControlOptions::is_flow_control_disabled)
    }

    /// Incoming DATA is policed unless we switched flow control off.
    pub fn is_receive_flow_controlled(&self) -> bool {
        !self.local_options.is_flow_control_disabled()
    }

    /// Record the peer's options. Only one call is allowed per session.
    pub fn latch_peer_options(
        &mut self,
        options: FlowControlOptions,
        streams: &mut ActiveStreams,
    ) -> Result<()> {
        if self.peer_options.is_some() {
            return Err(H2Error::flow_control(
                "flow control options may only be set once",
            ));
        }
        self.peer_options = Some(options);
        if options.is_flow_control_disabled() {
            debug!("peer disabled flow control");
            self.session_blocked = false;
            for stream in streams.iter_mut() {
                self.disable_stream_flow_control(stream);
            }
        }
        Ok(())
    }

    /// A fresh stream with windows taken from the current initial sizes.
    pub fn new_stream(&self, id: u32) -> Stream {
        let mut stream = Stream::new(id, self.streams_initial_window, self.stream_recv_initial);
        if !self.is_session_flow_controlled() {
            stream.flow_controlled = false;
        }
        stream
    }

    pub fn is_stream_flow_controlled(&self, stream: &Stream) -> bool {
        stream.flow_controlled && self.is_session_flow_controlled()
    }

    /// One-way: a stream never becomes flow controlled again.
    pub fn disable_stream_flow_control(&self, stream: &mut Stream) {
        stream.flow_controlled = false;
        stream.flow_control_blocked = false;
    }

    pub fn enable_stream_flow_control(&self, stream: &Stream) -> Result<()> {
        if !stream.flow_controlled {
            return Err(H2Error::stream(
                stream.id(),
                ErrorCode::FlowControlError,
                "flow control cannot be re-enabled on a stream",
            ));
        }
        Ok(())
    }

    /// Bytes of DATA that may be sent on `stream` right now.
    pub fn send_capacity(&self, stream: &Stream) -> usize {
        let mut capacity = i64::from(MAX_WINDOW_SIZE);
        if self.is_session_flow_controlled() {
            capacity = capacity.min(i64::from(self.session_window));
        }
        if self.is_stream_flow_controlled(stream) {
            capacity = capacity.min(i64::from(stream.send_window));
        }
        capacity.max(0) as usize
    }

    /// Debit windows for a DATA frame handed to the transport.
    pub fn on_data_frame_sent(&mut self, streams: &mut ActiveStreams, stream_id: u32, len: usize) {
        let len_i32 = len.min(MAX_WINDOW_SIZE as usize) as i32;

        if self.is_session_flow_controlled() {
            self.session_window -= len_i32;
            self.total_sent += len as u64;
            if self.session_window <= 0 {
                debug!(window = self.session_window, "session send window exhausted");
                self.session_blocked = true;
            }
        }

        let controlled = self.is_session_flow_controlled();
        let Some(stream) = streams.get_mut(stream_id) else {
            trace!(stream_id, "DATA sent for a stream that is gone");
            return;
        };
        if controlled && stream.flow_controlled {
            stream.send_window -= len_i32;
            if stream.send_window <= 0 {
                debug!(stream_id, window = stream.send_window, "stream send window exhausted");
                stream.flow_control_blocked = true;
            }
        }
    }

    /// Apply a WINDOW_UPDATE from the peer.
    pub fn on_window_update_received(
        &mut self,
        streams: &mut ActiveStreams,
        stream_id: u32,
        increment: u32,
    ) -> Result<()> {
        if stream_id == 0 {
            if increment == 0 {
                return Err(H2Error::protocol("WINDOW_UPDATE with zero increment"));
            }
            let window = i64::from(self.session_window) + i64::from(increment);
            if window > i64::from(MAX_WINDOW_SIZE) {
                return Err(H2Error::flow_control("session window overflow"));
            }
            self.session_window = window as i32;
            self.total_credited += u64::from(increment);
            if self.session_window > 0 {
                self.session_blocked = false;
            }
            trace!(increment, window = self.session_window, "session window credited");
            return Ok(());
        }

        let Some(stream) = streams.get_mut(stream_id) else {
            return Err(H2Error::StreamNotFound(stream_id));
        };
        if increment == 0 {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "WINDOW_UPDATE with zero increment",
            ));
        }
        if !stream.flow_controlled {
            return Ok(());
        }
        let window = i64::from(stream.send_window) + i64::from(increment);
        if window > i64::from(MAX_WINDOW_SIZE) {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::FlowControlError,
                "stream window overflow",
            ));
        }
        stream.send_window = window as i32;
        if stream.send_window > 0 {
            stream.flow_control_blocked = false;
        }
        trace!(stream_id, increment, window = stream.send_window, "stream window credited");
        Ok(())
    }

    /// Apply a new peer INITIAL_WINDOW_SIZE as a delta to every
    /// flow-controlled stream's send window.
    pub fn update_streams_initial_window(
        &mut self,
        streams: &mut ActiveStreams,
        new_initial: u32,
    ) -> Result<()> {
        if new_initial > MAX_WINDOW_SIZE as u32 {
            return Err(H2Error::flow_control("initial window size exceeds 2^31-1"));
        }
        let delta = i64::from(new_initial) - i64::from(self.streams_initial_window);

        for stream_id in streams.flow_controlled_ids() {
            let Some(stream) = streams.get_mut(stream_id) else {
                continue;
            };
            let window = i64::from(stream.send_window) + delta;
            if window > i64::from(MAX_WINDOW_SIZE) {
                return Err(H2Error::flow_control(format!(
                    "stream {} window overflow after SETTINGS",
                    stream.id()
                )));
            }
            stream.send_window = window as i32;
            stream.flow_control_blocked = stream.send_window <= 0;
        }

        self.streams_initial_window = new_initial as i32;
        Ok(())
    }

    /// Debit receive windows for an incoming DATA frame.
    pub fn on_data_frame_received(&mut self, stream: Option<&mut Stream>, len: usize) -> Result<()> {
        if !self.is_receive_flow_controlled() || len == 0 {
            return Ok(());
        }
        let len_i64 = len as i64;

        if len_i64 > i64::from(self.session_recv_window) {
            return Err(H2Error::flow_control(format!(
                "DATA of {} bytes exceeds session receive window {}",
                len, self.session_recv_window
            )));
        }
        self.session_recv_window -= len_i64 as i32;

        if let Some(stream) = stream {
            if len_i64 > i64::from(stream.recv_window) {
                return Err(H2Error::stream(
                    stream.id(),
                    ErrorCode::FlowControlError,
                    format!(
                        "DATA of {} bytes exceeds stream receive window {}",
                        len, stream.recv_window
                    ),
                ));
            }
            stream.recv_window -= len_i64 as i32;
        }
        Ok(())
    }

    /// Release receive credit for bytes the application consumed (or that
    /// were discarded). Returns `(stream_id, increment)` pairs to announce
    /// with WINDOW_UPDATE, stream id 0 being the session.
    pub fn on_data_consumed(&mut self, stream: Option<&mut Stream>, len: usize) -> Vec<(u32, u32)> {
        let mut updates = Vec::new();
        if !self.is_receive_flow_controlled() || len == 0 {
            return updates;
        }
        let len = len.min(MAX_WINDOW_SIZE as usize) as u32;

        self.session_recv_unacked += len;
        if self.session_recv_unacked >= (self.session_recv_initial as u32) / 2 {
            let increment = self.session_recv_unacked;
            self.session_recv_window = self.session_recv_window.saturating_add(increment as i32);
            self.session_recv_unacked = 0;
            updates.push((0, increment));
        }

        if let Some(stream) = stream {
            // No point crediting a stream the peer can no longer send on.
            if stream.state().can_recv_data() {
                stream.recv_unacked += len;
                if stream.recv_unacked >= (self.stream_recv_initial as u32) / 2 {
                    let increment = stream.recv_unacked;
                    stream.recv_window = stream.recv_window.saturating_add(increment as i32);
                    stream.recv_unacked = 0;
                    updates.push((stream.id(), increment));
                }
            }
        }

        updates
    }

    /// WINDOW_UPDATE needed at session start when the configured connection
    /// window exceeds the RFC default.
    pub fn initial_session_credit(&mut self) -> Option<u32> {
        let extra = self.session_recv_initial - self.session_recv_window;
        if extra > 0 {
            self.session_recv_window += extra;
            Some(extra as u32)
        } else {
            None
        }
    }
}

fn clamp_window(size: u32) -> i32 {
    size.min(MAX_WINDOW_SIZE as u32) as i32
}
