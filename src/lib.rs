//! h2-engine: an HTTP/2 wire engine
//!
//! This crate implements the protocol core of an HTTP/2 endpoint: framing,
//! HPACK header compression, flow control, settings negotiation and the
//! per-stream / per-session state machines. The core is sans-I/O; a small
//! tokio driver runs it over any `AsyncRead + AsyncWrite` transport.
//!
//! # Features
//!
//! - **RFC 7540 Framing**: All ten frame types, incremental parsing,
//!   CONTINUATION assembly, frame-size and padding validation
//! - **HPACK (RFC 7541)**: Static and dynamic tables, Huffman coding,
//!   per-field indexing directives, table size updates
//! - **Flow Control**: Session and stream windows, SETTINGS deltas,
//!   negative windows, automatic WINDOW_UPDATE replenishment
//! - **Session State Machine**: Stream lifecycle, concurrency limits,
//!   RST_STREAM / GOAWAY handling, PING round trips, server push
//! - **Async Driver**: Single reader, single writer, cancellation and
//!   bounded GOAWAY draining on tokio
//!
//! # Quick Start
//!
//! ```rust
//! use bytes::BytesMut;
//! use h2_engine::{HeaderField, Session, SessionConfig, SessionEvent};
//!
//! let mut client = Session::client(SessionConfig::client());
//! let mut server = Session::server(SessionConfig::server());
//!
//! let request = [
//!     HeaderField::new(":method", "GET"),
//!     HeaderField::new(":scheme", "https"),
//!     HeaderField::new(":path", "/"),
//!     HeaderField::new(":authority", "example.com"),
//! ];
//! let stream_id = client.send_request(&request, None, true).unwrap();
//!
//! // Move bytes between the two endpoints.
//! let mut wire = BytesMut::new();
//! client.poll_output(&mut wire);
//! server.recv(&wire).unwrap();
//!
//! while let Some(event) = server.poll_event() {
//!     if let SessionEvent::Headers { stream_id, .. } = event {
//!         let block = server.take_headers(stream_id).unwrap().unwrap();
//!         assert_eq!(block.fields[2].value, "/");
//!     }
//! }
//! # assert_eq!(stream_id, 1);
//! ```
//!
//! # Architecture
//!
//! - [`frame`] / [`codec`]: bytes ↔ [`Frame`]
//! - [`hpack`]: header block compression
//! - [`flow_control`], [`settings`], [`stream`]: protocol bookkeeping
//! - [`session`]: the sans-I/O state machine tying them together
//! - [`connection`]: tokio driver with [`SessionHandle`] / [`StreamHandle`]
//! - [`handshake`]: negotiated-protocol monitor (ALPN, NPN, h2c)
//!
//! It does NOT provide:
//! - TLS (use rustls or similar, then report the ALPN result)
//! - HTTP semantics beyond header ordering (routing, content coding)

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frame;
pub mod handshake;
pub mod hpack;
pub mod http1;
pub mod session;
pub mod settings;
pub mod stream;

pub use codec::{H2Codec, MAX_HEADER_BLOCK_SIZE};
pub use config::SessionConfig;
pub use connection::{Connection, SessionHandle, StreamHandle};
pub use error::{error_code, ErrorCode, H2Error, Result};
pub use flow_control::{FlowControlManager, FlowControlOptions};
pub use frame::{
    flags, frame_type, is_h2c_preface, settings_id, Decoded, Frame, FrameHeader, Priority,
    CONNECTION_PREFACE,
};
pub use handshake::{is_http2_protocol, ProtocolObserver, ProtocolSelectionMonitor};
pub use hpack::{HeaderField, HeadersList, HpackDecoder, HpackEncoder, Indexing};
pub use http1::write_error_response;
pub use session::{ListenerId, Role, Session, SessionEvent, SessionListener, SessionState};
pub use settings::{Settings, SettingsManager};
pub use stream::{ActiveStreams, DataChunk, HeaderBlock, Stream, StreamState};
