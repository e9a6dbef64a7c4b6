//! Error types for the HTTP/2 engine.
//!
//! Errors are split the way RFC 7540 Section 5.4 splits them: connection
//! errors tear the whole session down (GOAWAY), stream errors only reset
//! one stream (RST_STREAM). Everything else is either a transport failure
//! or a misuse of the API.

use std::fmt;
use std::io;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, H2Error>;

/// HTTP/2 error codes (RFC 7540 Section 7) as raw wire values.
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const SETTINGS_TIMEOUT: u32 = 0x4;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
    pub const COMPRESSION_ERROR: u32 = 0x9;
    pub const CONNECT_ERROR: u32 = 0xa;
    pub const ENHANCE_YOUR_CALM: u32 = 0xb;
    pub const INADEQUATE_SECURITY: u32 = 0xc;
    pub const HTTP_1_1_REQUIRED: u32 = 0xd;
}

/// Typed HTTP/2 error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = error_code::NO_ERROR,
    ProtocolError = error_code::PROTOCOL_ERROR,
    InternalError = error_code::INTERNAL_ERROR,
    FlowControlError = error_code::FLOW_CONTROL_ERROR,
    SettingsTimeout = error_code::SETTINGS_TIMEOUT,
    StreamClosed = error_code::STREAM_CLOSED,
    FrameSizeError = error_code::FRAME_SIZE_ERROR,
    RefusedStream = error_code::REFUSED_STREAM,
    Cancel = error_code::CANCEL,
    CompressionError = error_code::COMPRESSION_ERROR,
    ConnectError = error_code::CONNECT_ERROR,
    EnhanceYourCalm = error_code::ENHANCE_YOUR_CALM,
    InadequateSecurity = error_code::INADEQUATE_SECURITY,
    Http11Required = error_code::HTTP_1_1_REQUIRED,
}

impl ErrorCode {
    /// Wire value of this code.
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parse a wire value. Unknown codes map to `InternalError`
    /// (RFC 7540 Section 7: unknown codes must not trigger special behavior).
    pub fn from_u32(code: u32) -> Self {
        match code {
            error_code::NO_ERROR => Self::NoError,
            error_code::PROTOCOL_ERROR => Self::ProtocolError,
            error_code::INTERNAL_ERROR => Self::InternalError,
            error_code::FLOW_CONTROL_ERROR => Self::FlowControlError,
            error_code::SETTINGS_TIMEOUT => Self::SettingsTimeout,
            error_code::STREAM_CLOSED => Self::StreamClosed,
            error_code::FRAME_SIZE_ERROR => Self::FrameSizeError,
            error_code::REFUSED_STREAM => Self::RefusedStream,
            error_code::CANCEL => Self::Cancel,
            error_code::COMPRESSION_ERROR => Self::CompressionError,
            error_code::CONNECT_ERROR => Self::ConnectError,
            error_code::ENHANCE_YOUR_CALM => Self::EnhanceYourCalm,
            error_code::INADEQUATE_SECURITY => Self::InadequateSecurity,
            error_code::HTTP_1_1_REQUIRED => Self::Http11Required,
            _ => Self::InternalError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
        };
        f.write_str(name)
    }
}

/// Engine error.
#[derive(Debug, thiserror::Error)]
pub enum H2Error {
    /// Fatal session error; the session sends GOAWAY with `code` and closes.
    #[error("connection error {code}: {reason}")]
    Connection { code: ErrorCode, reason: String },

    /// Recoverable error confined to one stream; answered with RST_STREAM.
    #[error("stream {stream_id} error {code}: {reason}")]
    Stream {
        stream_id: u32,
        code: ErrorCode,
        reason: String,
    },

    /// A frame or operation addressed a stream that is not (or no longer) active.
    #[error("stream {0} not found")]
    StreamNotFound(u32),

    /// Admitting the stream would exceed the peer's concurrency ceiling.
    #[error("stream {0} refused: concurrent stream limit reached")]
    RefusedStream(u32),

    /// The stream or session send window is exhausted.
    #[error("stream {0} is blocked by flow control")]
    FlowControlBlocked(u32),

    /// The session has terminated; pending operations fail with this.
    #[error("session closed ({0})")]
    SessionClosed(ErrorCode),

    /// The negotiated application protocol is not an HTTP/2 identifier.
    #[error("unsupported application protocol {0:?}")]
    UnsupportedProtocol(String),

    /// Protocol selection did not complete in time.
    #[error("protocol negotiation timed out")]
    HandshakeTimeout,

    /// An observer is already attached to the monitor.
    #[error("monitor is busy: an observer is already attached")]
    MonitorBusy,

    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl H2Error {
    /// Build a connection error.
    pub fn connection(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Connection {
            code,
            reason: reason.into(),
        }
    }

    /// Build a PROTOCOL_ERROR connection error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::ProtocolError, reason)
    }

    /// Build a COMPRESSION_ERROR connection error.
    pub fn compression(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::CompressionError, reason)
    }

    /// Build a FRAME_SIZE_ERROR connection error.
    pub fn frame_size(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::FrameSizeError, reason)
    }

    /// Build a FLOW_CONTROL_ERROR connection error.
    pub fn flow_control(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::FlowControlError, reason)
    }

    /// Build a stream error.
    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    /// True when the error must terminate the whole session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::SessionClosed(_) | Self::Io(_)
        )
    }

    /// HTTP/2 error code carried by (or implied by) this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connection { code, .. } | Self::Stream { code, .. } => *code,
            Self::StreamNotFound(_) => ErrorCode::StreamClosed,
            Self::RefusedStream(_) => ErrorCode::RefusedStream,
            Self::FlowControlBlocked(_) => ErrorCode::FlowControlError,
            Self::SessionClosed(code) => *code,
            Self::UnsupportedProtocol(_) => ErrorCode::Http11Required,
            Self::HandshakeTimeout | Self::MonitorBusy | Self::Io(_) => ErrorCode::InternalError,
        }
    }
}
