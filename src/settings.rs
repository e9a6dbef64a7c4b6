//! HTTP/2 connection settings (RFC 7540 Section 6.5).

use tracing::debug;

use crate::error::{H2Error, Result};
use crate::flow_control::{FlowControlManager, FlowControlOptions, MAX_WINDOW_SIZE};
use crate::frame::{settings_id, MAX_MAX_FRAME_SIZE};
use crate::stream::ActiveStreams;

pub use crate::flow_control::DEFAULT_INITIAL_WINDOW_SIZE;
pub use crate::frame::DEFAULT_MAX_FRAME_SIZE;

/// Default header table size (4 KB).
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Default max concurrent streams we advertise.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 256;

/// Default max header list size (64 KB).
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 65_536;

/// HTTP/2 connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Maximum size of the header compression table.
    pub header_table_size: u32,
    /// Whether server push is enabled.
    pub enable_push: bool,
    /// Maximum number of concurrent streams (`u32::MAX` = unlimited).
    pub max_concurrent_streams: u32,
    /// Initial window size for stream-level flow control.
    pub initial_window_size: u32,
    /// Maximum frame payload size.
    pub max_frame_size: u32,
    /// Maximum size of header list (`u32::MAX` = unlimited).
    pub max_header_list_size: u32,
    /// Draft-era flow-control policy bits.
    pub flow_control_options: FlowControlOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE as u32,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
            flow_control_options: FlowControlOptions::default(),
        }
    }
}

impl Settings {
    /// Client-side defaults (push disabled).
    pub fn client() -> Self {
        Self {
            enable_push: false,
            ..Self::default()
        }
    }

    pub fn server() -> Self {
        Self::default()
    }

    /// What a peer is assumed to use before its first SETTINGS frame.
    pub fn protocol_defaults() -> Self {
        Self {
            max_concurrent_streams: u32::MAX,
            max_header_list_size: u32::MAX,
            ..Self::default()
        }
    }

    /// Apply one SETTINGS entry, validating its value. Unknown ids are ignored.
    pub fn apply(&mut self, id: u16, value: u32) -> Result<()> {
        match id {
            settings_id::HEADER_TABLE_SIZE => self.header_table_size = value,
            settings_id::ENABLE_PUSH => {
                self.enable_push = match value {
                    0 => false,
                    1 => true,
                    _ => return Err(H2Error::protocol("ENABLE_PUSH must be 0 or 1")),
                };
            }
            settings_id::MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = value,
            settings_id::INITIAL_WINDOW_SIZE => {
                if value > MAX_WINDOW_SIZE as u32 {
                    return Err(H2Error::flow_control(
                        "initial window size exceeds maximum (2^31-1)",
                    ));
                }
                self.initial_window_size = value;
            }
            settings_id::MAX_FRAME_SIZE => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(H2Error::protocol("max frame size out of valid range"));
                }
                self.max_frame_size = value;
            }
            settings_id::MAX_HEADER_LIST_SIZE => self.max_header_list_size = value,
            settings_id::FLOW_CONTROL_OPTIONS => {
                self.flow_control_options = FlowControlOptions::from_bits(value);
            }
            _ => {}
        }
        Ok(())
    }

    /// Entries for a SETTINGS frame advertising these values.
    pub fn to_entries(&self) -> Vec<(u16, u32)> {
        let mut entries = vec![
            (settings_id::HEADER_TABLE_SIZE, self.header_table_size),
            (settings_id::ENABLE_PUSH, u32::from(self.enable_push)),
        ];
        if self.max_concurrent_streams != u32::MAX {
            entries.push((settings_id::MAX_CONCURRENT_STREAMS, self.max_concurrent_streams));
        }
        entries.push((settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size));
        entries.push((settings_id::MAX_FRAME_SIZE, self.max_frame_size));
        if self.max_header_list_size != u32::MAX {
            entries.push((settings_id::MAX_HEADER_LIST_SIZE, self.max_header_list_size));
        }
        if self.flow_control_options != FlowControlOptions::default() {
            entries.push((
                settings_id::FLOW_CONTROL_OPTIONS,
                self.flow_control_options.bits(),
            ));
        }
        entries
    }
}

/// Parameters that changed in one received SETTINGS frame and that the
/// session must push into components it owns (HPACK encoder, framing).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsChanges {
    pub header_table_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub enable_push: Option<bool>,
}

/// Local and peer settings of one session.
#[derive(Debug)]
pub struct SettingsManager {
    local: Settings,
    peer: Settings,
    peer_settings_received: bool,
    /// SETTINGS frames we sent that the peer has not acknowledged yet.
    pending_acks: usize,
}

impl SettingsManager {
    pub fn new(local: Settings) -> Self {
        Self {
            local,
            peer: Settings::protocol_defaults(),
            peer_settings_received: false,
            pending_acks: 0,
        }
    }

    pub fn local(&self) -> &Settings {
        &self.local
    }

    pub fn peer(&self) -> &Settings {
        &self.peer
    }

    pub fn peer_settings_received(&self) -> bool {
        self.peer_settings_received
    }

    /// Note that a SETTINGS frame was queued for the peer.
    pub fn on_settings_sent(&mut self) {
        self.pending_acks += 1;
    }

    /// Returns true when every sent SETTINGS has now been acknowledged.
    pub fn on_ack_received(&mut self) -> bool {
        self.pending_acks = self.pending_acks.saturating_sub(1);
        self.pending_acks == 0
    }

    pub fn pending_acks(&self) -> usize {
        self.pending_acks
    }

    /// Apply a received (non-ACK) SETTINGS frame.
    ///
    /// Flow-control consequences are applied directly: the concurrency
    /// ceiling on `streams`, INITIAL_WINDOW_SIZE deltas on every
    /// flow-controlled stream, and the one-shot FLOW_CONTROL_OPTIONS.
    pub fn apply_settings(
        &mut self,
        entries: &[(u16, u32)],
        streams: &mut ActiveStreams,
        flow: &mut FlowControlManager,
    ) -> Result<SettingsChanges> {
        let first = !self.peer_settings_received;
        self.peer_settings_received = true;
        let mut changes = SettingsChanges::default();

        for &(id, value) in entries {
            self.peer.apply(id, value)?;

            match id {
                settings_id::HEADER_TABLE_SIZE => changes.header_table_size = Some(value),
                settings_id::ENABLE_PUSH => changes.enable_push = Some(value == 1),
                settings_id::MAX_CONCURRENT_STREAMS => {
                    streams.set_max_concurrent_streams(value);
                    changes.max_concurrent_streams = Some(value);
                }
                settings_id::INITIAL_WINDOW_SIZE => {
                    flow.update_streams_initial_window(streams, value)?;
                    changes.initial_window_size = Some(value);
                }
                settings_id::MAX_FRAME_SIZE => changes.max_frame_size = Some(value),
                settings_id::FLOW_CONTROL_OPTIONS => {
                    if !first {
                        return Err(H2Error::flow_control(
                            "FLOW_CONTROL_OPTIONS after the first SETTINGS frame",
                        ));
                    }
                    flow.latch_peer_options(FlowControlOptions::from_bits(value), streams)?;
                }
                _ => {}
            }
        }

        debug!(entries = entries.len(), ?changes, "peer settings applied");
        Ok(changes)
    }
}
