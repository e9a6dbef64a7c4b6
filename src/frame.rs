//! HTTP/2 frame layout (RFC 7540 Section 4 and 6).
//!
//! `Frame::decode` is a pure transform: it never blocks and never errors on
//! short input, it reports how many more bytes it needs instead. Stream-id
//! scoping and fixed payload sizes are validated here so the session only
//! ever sees well-formed frames.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ErrorCode, H2Error, Result};

/// HTTP/2 frame types (RFC 7540 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 SETTINGS identifiers (RFC 7540 Section 6.5.2)
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
    /// Draft-era flow-control policy (HTTP/2 draft 04, Section 6.5.2).
    pub const FLOW_CONTROL_OPTIONS: u16 = 0xa;
}

/// Size of the fixed frame preamble.
pub const FRAME_HEADER_LEN: usize = 9;

/// Default and minimum SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest frame payload the 24-bit length field can describe.
pub const MAX_MAX_FRAME_SIZE: u32 = 0x00ff_ffff;

/// Highest valid stream identifier.
pub const MAX_STREAM_ID: u32 = 0x7fff_ffff;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with HTTP/2 connection preface (h2c detection)
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.len() >= CONNECTION_PREFACE.len() && &data[..CONNECTION_PREFACE.len()] == CONNECTION_PREFACE
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,    // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32, // 31 bits (high bit reserved)
}

impl FrameHeader {
    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }

        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let frame_type = data[3];
        let flags = data[4];
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & MAX_STREAM_ID;

        Some(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    /// Write the 9-byte preamble.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8((self.length >> 16) as u8);
        dst.put_u8((self.length >> 8) as u8);
        dst.put_u8(self.length as u8);
        dst.put_u8(self.frame_type);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id & MAX_STREAM_ID);
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Check if END_STREAM flag is set
    pub fn is_end_stream(&self) -> bool {
        self.has_flag(flags::END_STREAM)
    }

    /// Check if END_HEADERS flag is set
    pub fn is_end_headers(&self) -> bool {
        self.has_flag(flags::END_HEADERS)
    }
}

/// Stream dependency carried by PRIORITY frames and prioritized HEADERS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    /// Wire weight (0..=255, meaning 1..=256).
    pub weight: u8,
}

impl Default for Priority {
    fn default() -> Self {
        Self {
            exclusive: false,
            dependency: 0,
            weight: 15,
        }
    }
}

impl Priority {
    fn parse(bytes: &[u8]) -> Self {
        let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Self {
            exclusive: raw & 0x8000_0000 != 0,
            dependency: raw & MAX_STREAM_ID,
            weight: bytes[4],
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        let mut raw = self.dependency & MAX_STREAM_ID;
        if self.exclusive {
            raw |= 0x8000_0000;
        }
        dst.put_u32(raw);
        dst.put_u8(self.weight);
    }
}

/// A decoded HTTP/2 frame with its type-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        /// Pad length when the frame carried the PADDED flag.
        padding: Option<u8>,
    },
    Headers {
        stream_id: u32,
        block: Bytes,
        priority: Option<Priority>,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
        priority: Priority,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
    Settings {
        ack: bool,
        /// (identifier, value) pairs in wire order. Empty for ACK frames.
        settings: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
        promised_id: u32,
        block: Bytes,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: u32,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        block: Bytes,
        end_headers: bool,
    },
    /// Extension frame; receivers ignore these.
    Unknown {
        frame_type: u8,
        flags: u8,
        stream_id: u32,
        payload: Bytes,
    },
}

/// Outcome of [`Frame::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame; `consumed` bytes of input were used.
    Frame { frame: Frame, consumed: usize },
    /// Not enough input yet; at least `needed` more bytes are required.
    Incomplete { needed: usize },
}

impl Frame {
    /// Decode one frame from the front of `buf`.
    pub fn decode(buf: &[u8], max_frame_size: u32) -> Result<Decoded> {
        let header = match FrameHeader::parse(buf) {
            Some(h) => h,
            None => {
                return Ok(Decoded::Incomplete {
                    needed: FRAME_HEADER_LEN - buf.len(),
                })
            }
        };

        if header.length > max_frame_size {
            return Err(H2Error::frame_size(format!(
                "frame length {} exceeds maximum {}",
                header.length, max_frame_size
            )));
        }

        let total_size = header.total_size();
        if buf.len() < total_size {
            return Ok(Decoded::Incomplete {
                needed: total_size - buf.len(),
            });
        }

        let payload = Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..total_size]);
        let frame = Self::from_parts(&header, payload)?;
        Ok(Decoded::Frame {
            frame,
            consumed: total_size,
        })
    }

    /// Build a frame from an already-split header and payload.
    pub fn from_parts(header: &FrameHeader, payload: Bytes) -> Result<Self> {
        check_stream_scope(header)?;

        match header.frame_type {
            frame_type::DATA => {
                let (data, padding) = strip_padding(header, payload, 0)?;
                Ok(Frame::Data {
                    stream_id: header.stream_id,
                    data,
                    end_stream: header.is_end_stream(),
                    padding,
                })
            }
            frame_type::HEADERS => {
                let prefix = if header.has_flag(flags::PRIORITY) { 5 } else { 0 };
                let (mut block, _) = strip_padding(header, payload, prefix)?;
                let priority = if prefix > 0 {
                    let priority = Priority::parse(&block[..5]);
                    let _ = block.split_to(5);
                    Some(priority)
                } else {
                    None
                };
                Ok(Frame::Headers {
                    stream_id: header.stream_id,
                    block,
                    priority,
                    end_stream: header.is_end_stream(),
                    end_headers: header.is_end_headers(),
                })
            }
            frame_type::PRIORITY => {
                if payload.len() != 5 {
                    return Err(H2Error::stream(
                        header.stream_id,
                        ErrorCode::FrameSizeError,
                        "PRIORITY frame must be 5 bytes",
                    ));
                }
                Ok(Frame::Priority {
                    stream_id: header.stream_id,
                    priority: Priority::parse(&payload),
                })
            }
            frame_type::RST_STREAM => {
                if payload.len() != 4 {
                    return Err(H2Error::frame_size("RST_STREAM frame too short"));
                }
                Ok(Frame::RstStream {
                    stream_id: header.stream_id,
                    error_code: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
                })
            }
            frame_type::SETTINGS => {
                let ack = header.has_flag(flags::ACK);
                if ack && !payload.is_empty() {
                    return Err(H2Error::frame_size("SETTINGS ACK with payload"));
                }
                if payload.len() % 6 != 0 {
                    return Err(H2Error::frame_size("SETTINGS length not a multiple of 6"));
                }
                // Each entry is 6 bytes: u16 id + u32 value
                let settings = payload
                    .chunks_exact(6)
                    .map(|c| {
                        (
                            u16::from_be_bytes([c[0], c[1]]),
                            u32::from_be_bytes([c[2], c[3], c[4], c[5]]),
                        )
                    })
                    .collect();
                Ok(Frame::Settings { ack, settings })
            }
            frame_type::PUSH_PROMISE => {
                let (mut block, _) = strip_padding(header, payload, 4)?;
                let promised_id =
                    u32::from_be_bytes([block[0], block[1], block[2], block[3]]) & MAX_STREAM_ID;
                let _ = block.split_to(4);
                Ok(Frame::PushPromise {
                    stream_id: header.stream_id,
                    promised_id,
                    block,
                    end_headers: header.is_end_headers(),
                })
            }
            frame_type::PING => {
                if payload.len() != 8 {
                    return Err(H2Error::frame_size("PING frame too short"));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Ok(Frame::Ping {
                    ack: header.has_flag(flags::ACK),
                    data,
                })
            }
            frame_type::GOAWAY => {
                if payload.len() < 8 {
                    return Err(H2Error::frame_size("GOAWAY frame too short"));
                }
                let last_stream_id =
                    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & MAX_STREAM_ID;
                let error_code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
                Ok(Frame::GoAway {
                    last_stream_id,
                    error_code,
                    debug_data: payload.slice(8..),
                })
            }
            frame_type::WINDOW_UPDATE => {
                if payload.len() != 4 {
                    return Err(H2Error::frame_size("WINDOW_UPDATE frame too short"));
                }
                let increment =
                    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & MAX_STREAM_ID;
                Ok(Frame::WindowUpdate {
                    stream_id: header.stream_id,
                    increment,
                })
            }
            frame_type::CONTINUATION => Ok(Frame::Continuation {
                stream_id: header.stream_id,
                block: payload,
                end_headers: header.is_end_headers(),
            }),
            other => Ok(Frame::Unknown {
                frame_type: other,
                flags: header.flags,
                stream_id: header.stream_id,
                payload,
            }),
        }
    }

    /// Frame type code.
    pub fn frame_type(&self) -> u8 {
        match self {
            Frame::Data { .. } => frame_type::DATA,
            Frame::Headers { .. } => frame_type::HEADERS,
            Frame::Priority { .. } => frame_type::PRIORITY,
            Frame::RstStream { .. } => frame_type::RST_STREAM,
            Frame::Settings { .. } => frame_type::SETTINGS,
            Frame::PushPromise { .. } => frame_type::PUSH_PROMISE,
            Frame::Ping { .. } => frame_type::PING,
            Frame::GoAway { .. } => frame_type::GOAWAY,
            Frame::WindowUpdate { .. } => frame_type::WINDOW_UPDATE,
            Frame::Continuation { .. } => frame_type::CONTINUATION,
            Frame::Unknown { frame_type, .. } => *frame_type,
        }
    }

    /// Stream the frame is addressed to (0 for session-level frames).
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    /// Bytes of this frame that count against flow-control windows
    /// (the whole DATA payload, padding included).
    pub fn flow_controlled_len(&self) -> usize {
        match self {
            Frame::Data { data, padding, .. } => {
                data.len() + padding.map_or(0, |p| p as usize + 1)
            }
            _ => 0,
        }
    }

    /// Serialize the frame, preamble included.
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut payload = BytesMut::new();
        let mut frame_flags = 0u8;

        match self {
            Frame::Data {
                data,
                end_stream,
                padding,
                ..
            } => {
                if *end_stream {
                    frame_flags |= flags::END_STREAM;
                }
                if let Some(pad) = padding {
                    frame_flags |= flags::PADDED;
                    payload.put_u8(*pad);
                    payload.extend_from_slice(data);
                    payload.put_bytes(0, *pad as usize);
                } else {
                    payload.extend_from_slice(data);
                }
            }
            Frame::Headers {
                block,
                priority,
                end_stream,
                end_headers,
                ..
            } => {
                if *end_stream {
                    frame_flags |= flags::END_STREAM;
                }
                if *end_headers {
                    frame_flags |= flags::END_HEADERS;
                }
                if let Some(priority) = priority {
                    frame_flags |= flags::PRIORITY;
                    priority.encode(&mut payload);
                }
                payload.extend_from_slice(block);
            }
            Frame::Priority { priority, .. } => priority.encode(&mut payload),
            Frame::RstStream { error_code, .. } => payload.put_u32(*error_code),
            Frame::Settings { ack, settings } => {
                if *ack {
                    frame_flags |= flags::ACK;
                }
                for (id, value) in settings {
                    payload.put_u16(*id);
                    payload.put_u32(*value);
                }
            }
            Frame::PushPromise {
                promised_id,
                block,
                end_headers,
                ..
            } => {
                if *end_headers {
                    frame_flags |= flags::END_HEADERS;
                }
                payload.put_u32(*promised_id & MAX_STREAM_ID);
                payload.extend_from_slice(block);
            }
            Frame::Ping { ack, data } => {
                if *ack {
                    frame_flags |= flags::ACK;
                }
                payload.extend_from_slice(data);
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                payload.put_u32(*last_stream_id & MAX_STREAM_ID);
                payload.put_u32(*error_code);
                payload.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate { increment, .. } => payload.put_u32(*increment & MAX_STREAM_ID),
            Frame::Continuation {
                block, end_headers, ..
            } => {
                if *end_headers {
                    frame_flags |= flags::END_HEADERS;
                }
                payload.extend_from_slice(block);
            }
            Frame::Unknown {
                flags: raw_flags,
                payload: raw,
                ..
            } => {
                frame_flags = *raw_flags;
                payload.extend_from_slice(raw);
            }
        }

        let header = FrameHeader {
            length: payload.len() as u32,
            frame_type: self.frame_type(),
            flags: frame_flags,
            stream_id: self.stream_id(),
        };
        dst.reserve(header.total_size());
        header.encode(dst);
        dst.extend_from_slice(&payload);
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }

    /// SETTINGS frame carrying `settings`.
    pub fn settings(settings: Vec<(u16, u32)>) -> Self {
        Frame::Settings {
            ack: false,
            settings,
        }
    }

    /// SETTINGS ACK frame.
    pub fn settings_ack() -> Self {
        Frame::Settings {
            ack: true,
            settings: Vec::new(),
        }
    }

    pub fn ping(data: [u8; 8]) -> Self {
        Frame::Ping { ack: false, data }
    }

    pub fn ping_ack(data: [u8; 8]) -> Self {
        Frame::Ping { ack: true, data }
    }

    /// stream_id=0 updates connection-level window, otherwise stream-level
    pub fn window_update(stream_id: u32, increment: u32) -> Self {
        Frame::WindowUpdate {
            stream_id,
            increment: increment & MAX_STREAM_ID,
        }
    }

    pub fn rst_stream(stream_id: u32, code: ErrorCode) -> Self {
        Frame::RstStream {
            stream_id,
            error_code: code.as_u32(),
        }
    }

    pub fn go_away(last_stream_id: u32, code: ErrorCode, debug_data: Bytes) -> Self {
        Frame::GoAway {
            last_stream_id,
            error_code: code.as_u32(),
            debug_data,
        }
    }

    pub fn continuation(stream_id: u32, block: Bytes, end_headers: bool) -> Self {
        Frame::Continuation {
            stream_id,
            block,
            end_headers,
        }
    }
}

/// Enforce which frame types may (or must not) use stream 0.
fn check_stream_scope(header: &FrameHeader) -> Result<()> {
    match header.frame_type {
        frame_type::DATA
        | frame_type::HEADERS
        | frame_type::PRIORITY
        | frame_type::RST_STREAM
        | frame_type::PUSH_PROMISE
        | frame_type::CONTINUATION => {
            if header.stream_id == 0 {
                return Err(H2Error::protocol(format!(
                    "frame type {:#x} requires a non-zero stream id",
                    header.frame_type
                )));
            }
        }
        frame_type::SETTINGS | frame_type::PING | frame_type::GOAWAY => {
            if header.stream_id != 0 {
                return Err(H2Error::protocol(format!(
                    "frame type {:#x} must use stream 0, got stream {}",
                    header.frame_type, header.stream_id
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Strip the PADDED envelope. `prefix` is the number of fixed bytes that
/// follow the pad length (priority or promised id) and must be present.
fn strip_padding(header: &FrameHeader, mut payload: Bytes, prefix: usize) -> Result<(Bytes, Option<u8>)> {
    if !header.has_flag(flags::PADDED) {
        if payload.len() < prefix {
            return Err(H2Error::frame_size(format!(
                "frame type {:#x} payload shorter than {} bytes",
                header.frame_type, prefix
            )));
        }
        return Ok((payload, None));
    }

    if payload.is_empty() {
        return Err(H2Error::protocol("PADDED frame with no payload"));
    }
    let pad_length = payload[0] as usize;
    if 1 + prefix + pad_length > payload.len() {
        return Err(H2Error::protocol(format!(
            "invalid padding length {} in frame of {} bytes",
            pad_length,
            payload.len()
        )));
    }
    payload.truncate(payload.len() - pad_length);
    let _ = payload.split_to(1);
    Ok((payload, Some(pad_length as u8)))
}
