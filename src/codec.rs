//! Incremental HTTP/2 frame reader.
//!
//! Feed raw transport bytes with [`H2Codec::feed`] and pull whole frames in
//! arrival order with [`H2Codec::next_frame`] (or [`H2Codec::process`] for
//! everything at once). HEADERS/PUSH_PROMISE followed by CONTINUATION
//! frames are folded into a single frame carrying the complete header block,
//! so the HPACK decoder always sees one contiguous block.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::{H2Error, Result};
use crate::frame::{Decoded, Frame, FrameHeader, Priority, CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE};

/// Maximum accumulated header block size (256 KB).
/// Prevents unbounded memory growth from malicious/buggy CONTINUATION floods.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// A header block waiting for CONTINUATION frames.
#[derive(Debug)]
struct PendingHeaderBlock {
    stream_id: u32,
    kind: PendingKind,
    block: BytesMut,
}

#[derive(Debug)]
enum PendingKind {
    Headers {
        priority: Option<Priority>,
        end_stream: bool,
    },
    PushPromise {
        promised_id: u32,
    },
}

impl PendingHeaderBlock {
    fn finish(self) -> Frame {
        let block = self.block.freeze();
        match self.kind {
            PendingKind::Headers {
                priority,
                end_stream,
            } => Frame::Headers {
                stream_id: self.stream_id,
                block,
                priority,
                end_stream,
                end_headers: true,
            },
            PendingKind::PushPromise { promised_id } => Frame::PushPromise {
                stream_id: self.stream_id,
                promised_id,
                block,
                end_headers: true,
            },
        }
    }
}

/// Incremental frame reader with CONTINUATION assembly.
#[derive(Debug)]
pub struct H2Codec {
    /// Buffer for incomplete frames
    buffer: BytesMut,
    /// Whether the client connection preface must be stripped first (servers)
    expect_preface: bool,
    /// Connection preface received
    preface_received: bool,
    /// Largest frame payload we accept (our SETTINGS_MAX_FRAME_SIZE)
    max_frame_size: u32,
    /// Bound on an assembled header block
    max_header_block_size: usize,
    /// Header block waiting for CONTINUATION + END_HEADERS
    pending: Option<PendingHeaderBlock>,
}

impl Default for H2Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl H2Codec {
    /// Reader for the client side: no preface is expected from the peer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            expect_preface: false,
            preface_received: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
            pending: None,
        }
    }

    /// Reader for the server side: the 24-byte client preface must arrive
    /// before any frame.
    pub fn server() -> Self {
        Self {
            expect_preface: true,
            ..Self::new()
        }
    }

    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub fn set_max_header_block_size(&mut self, size: usize) {
        self.max_header_block_size = size;
    }

    pub fn preface_received(&self) -> bool {
        self.preface_received
    }

    /// True while a header block is waiting for CONTINUATION frames.
    pub fn is_mid_header_block(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes buffered but not yet forming a whole frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append raw transport bytes; pull frames out with [`H2Codec::next_frame`].
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete frame from the buffered input, or `Ok(None)` when more
    /// bytes are needed.
    ///
    /// A stream-level error (a PRIORITY frame of the wrong length, for
    /// instance) consumes the offending frame, so reading can carry on once
    /// the caller has answered it with RST_STREAM. Connection errors leave
    /// the codec in an unspecified state.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.strip_preface()? {
            return Ok(None);
        }

        loop {
            let decoded = match Frame::decode(&self.buffer, self.max_frame_size) {
                Ok(decoded) => decoded,
                Err(err) => return Err(self.skip_malformed(err)),
            };
            let (frame, consumed) = match decoded {
                Decoded::Frame { frame, consumed } => (frame, consumed),
                Decoded::Incomplete { .. } => return Ok(None),
            };
            let _ = self.buffer.split_to(consumed);

            trace!(
                stream_id = frame.stream_id(),
                frame_type = frame.frame_type(),
                len = consumed,
                "frame decoded"
            );

            if let Some(frame) = self.assemble(frame)? {
                return Ok(Some(frame));
            }
        }
    }

    /// Process incoming data and return the complete frames it finished.
    ///
    /// Stops at the first error; frames decoded before it in the same call
    /// are dropped. [`Session`](crate::Session) reads with
    /// [`H2Codec::next_frame`] instead so it can dispatch them.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.feed(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Returns false while the client preface is still incomplete.
    fn strip_preface(&mut self) -> Result<bool> {
        if !self.expect_preface || self.preface_received {
            return Ok(true);
        }
        let have = self.buffer.len().min(CONNECTION_PREFACE.len());
        if self.buffer[..have] != CONNECTION_PREFACE[..have] {
            return Err(H2Error::protocol("invalid connection preface"));
        }
        if have < CONNECTION_PREFACE.len() {
            return Ok(false);
        }
        let _ = self.buffer.split_to(CONNECTION_PREFACE.len());
        self.preface_received = true;
        trace!("connection preface received");
        Ok(true)
    }

    /// Drop the frame behind a stream-level decode error.
    fn skip_malformed(&mut self, err: H2Error) -> H2Error {
        if err.is_fatal() {
            return err;
        }
        if let Some(pending) = self.pending.as_ref() {
            return H2Error::protocol(format!(
                "malformed frame inside header block for stream {}",
                pending.stream_id
            ));
        }
        if let Some(header) = FrameHeader::parse(&self.buffer) {
            let consumed = header.total_size().min(self.buffer.len());
            let _ = self.buffer.split_to(consumed);
            trace!(stream_id = header.stream_id, len = consumed, "malformed frame skipped");
        }
        err
    }

    /// Fold header blocks; returns `None` while a block is still incomplete.
    fn assemble(&mut self, frame: Frame) -> Result<Option<Frame>> {
        if let Some(pending) = self.pending.as_ref() {
            let pending_stream = pending.stream_id;
            return match frame {
                Frame::Continuation {
                    stream_id,
                    block,
                    end_headers,
                } => {
                    if stream_id != pending_stream {
                        return Err(H2Error::protocol(format!(
                            "CONTINUATION for stream {} but pending headers on stream {}",
                            stream_id, pending_stream
                        )));
                    }
                    self.append(&block)?;
                    if end_headers {
                        Ok(self.pending.take().map(PendingHeaderBlock::finish))
                    } else {
                        Ok(None)
                    }
                }
                other => Err(H2Error::protocol(format!(
                    "frame type {:#x} interleaved inside header block for stream {}",
                    other.frame_type(),
                    pending_stream
                ))),
            };
        }

        match frame {
            Frame::Headers {
                stream_id,
                block,
                priority,
                end_stream,
                end_headers: false,
            } => {
                self.begin(
                    stream_id,
                    PendingKind::Headers {
                        priority,
                        end_stream,
                    },
                    block,
                )?;
                Ok(None)
            }
            Frame::PushPromise {
                stream_id,
                promised_id,
                block,
                end_headers: false,
            } => {
                self.begin(stream_id, PendingKind::PushPromise { promised_id }, block)?;
                Ok(None)
            }
            Frame::Continuation { stream_id, .. } => Err(H2Error::protocol(format!(
                "Unexpected CONTINUATION frame for stream {}",
                stream_id
            ))),
            Frame::Unknown { frame_type, .. } => {
                trace!(frame_type, "ignoring unknown frame type");
                Ok(None)
            }
            other => Ok(Some(other)),
        }
    }

    fn begin(&mut self, stream_id: u32, kind: PendingKind, block: Bytes) -> Result<()> {
        self.check_block_size(block.len())?;
        self.pending = Some(PendingHeaderBlock {
            stream_id,
            kind,
            block: BytesMut::from(&block[..]),
        });
        Ok(())
    }

    fn append(&mut self, fragment: &[u8]) -> Result<()> {
        let current = self.pending.as_ref().map_or(0, |p| p.block.len());
        if let Err(err) = self.check_block_size(current + fragment.len()) {
            self.pending = None;
            return Err(err);
        }
        if let Some(pending) = self.pending.as_mut() {
            pending.block.extend_from_slice(fragment);
        }
        Ok(())
    }

    fn check_block_size(&self, size: usize) -> Result<()> {
        if size > self.max_header_block_size {
            return Err(H2Error::protocol(format!(
                "Header block too large ({} bytes, max {})",
                size, self.max_header_block_size
            )));
        }
        Ok(())
    }

    /// Reset codec state
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.preface_received = false;
        self.pending = None;
    }
}
