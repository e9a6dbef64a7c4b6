//! Session configuration.

use std::time::Duration;

use crate::codec::MAX_HEADER_BLOCK_SIZE;
use crate::flow_control::{FlowControlOptions, DEFAULT_INITIAL_WINDOW_SIZE};
use crate::settings::Settings;

/// Default time allowed for in-flight streams after GOAWAY.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on waiting for the negotiated protocol.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for one HTTP/2 session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Settings advertised to the peer in our first SETTINGS frame.
    /// Their `flow_control_options` are our fixed local policy.
    pub settings: Settings,
    /// Connection-level receive window granted to the peer.
    pub connection_window_size: u32,
    /// Bound on a header block assembled from CONTINUATION frames.
    pub max_header_block_size: usize,
    /// Huffman-encode outgoing header strings when shorter.
    pub use_huffman: bool,
    /// How long in-flight streams may run after GOAWAY.
    pub drain_timeout: Duration,
    /// How long to wait for the negotiated application protocol.
    pub handshake_timeout: Duration,
    /// Answer PING frames automatically.
    pub auto_ping_ack: bool,
    /// Acknowledge SETTINGS frames automatically.
    pub auto_settings_ack: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            connection_window_size: DEFAULT_INITIAL_WINDOW_SIZE as u32,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
            use_huffman: true,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            auto_ping_ack: true,
            auto_settings_ack: true,
        }
    }
}

impl SessionConfig {
    /// Defaults for a client (push disabled).
    pub fn client() -> Self {
        Self {
            settings: Settings::client(),
            ..Self::default()
        }
    }

    /// Defaults for a server.
    pub fn server() -> Self {
        Self {
            settings: Settings::server(),
            ..Self::default()
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = max;
        self
    }

    /// Per-stream receive window (our SETTINGS_INITIAL_WINDOW_SIZE).
    pub fn with_initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = size;
        self
    }

    pub fn with_connection_window_size(mut self, size: u32) -> Self {
        self.connection_window_size = size;
        self
    }

    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = size;
        self
    }

    pub fn with_header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = size;
        self
    }

    pub fn with_enable_push(mut self, enabled: bool) -> Self {
        self.settings.enable_push = enabled;
        self
    }

    pub fn with_flow_control_options(mut self, options: FlowControlOptions) -> Self {
        self.settings.flow_control_options = options;
        self
    }

    pub fn with_max_header_block_size(mut self, size: usize) -> Self {
        self.max_header_block_size = size;
        self
    }

    pub fn with_huffman(mut self, enabled: bool) -> Self {
        self.use_huffman = enabled;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_auto_ping_ack(mut self, enabled: bool) -> Self {
        self.auto_ping_ack = enabled;
        self
    }

    pub fn with_auto_settings_ack(mut self, enabled: bool) -> Self {
        self.auto_settings_ack = enabled;
        self
    }
}
