use bytes::{Buf, Bytes, BytesMut};

use crate::error::UserError;
use crate::frame::{self, Frame, DEFAULT_MAX_FRAME_SIZE};
use crate::hpack;

/// The client connection preface.
pub const PREFACE: [u8; 24] = *b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1_024;

/// Serializes frames into the connection's write buffer.
///
/// Owns the outbound HPACK encoder, so every HEADERS/PUSH_PROMISE that passes
/// through advances compression state exactly once and in write order. Header
/// blocks larger than the peer's MAX_FRAME_SIZE leave as HEADERS plus
/// CONTINUATION frames. The embedding transport drains the buffer with
/// [`FrameWriter::take`].
#[derive(Debug)]
pub struct FrameWriter {
    buf: BytesMut,
    hpack: hpack::Encoder,

    /// The peer's advertised bound on what we may send.
    max_frame_size: usize,
}

impl FrameWriter {
    pub fn new(header_table_size: usize) -> FrameWriter {
        FrameWriter {
            buf: BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY),
            hpack: hpack::Encoder::new(header_table_size),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, val: usize) {
        debug_assert!(val <= frame::MAX_MAX_FRAME_SIZE as usize);
        self.max_frame_size = val;
    }

    /// Queues an HPACK table-size change, signaled at the next header block.
    pub fn set_header_table_size(&mut self, val: usize) {
        self.hpack.update_max_size(val);
    }

    pub fn set_huffman_enabled(&mut self, enabled: bool) {
        self.hpack.set_huffman_enabled(enabled);
    }

    pub fn write_preface(&mut self) {
        tracing::debug!("writing client preface");
        self.buf.extend_from_slice(&PREFACE);
    }

    /// Serializes one frame into the write buffer.
    pub fn buffer(&mut self, item: Frame) -> Result<(), UserError> {
        let span = tracing::trace_span!("buffer_frame");
        let _e = span.enter();

        tracing::debug!(frame = ?item, "send");

        match item {
            Frame::Data(v) => {
                if v.flow_len() as usize > self.max_frame_size {
                    return Err(UserError::PayloadTooBig);
                }
                v.encode(&mut self.buf);
            }
            Frame::Headers(v) => {
                v.encode(&mut self.hpack, &mut self.buf, self.max_frame_size);
            }
            Frame::PushPromise(v) => {
                v.encode(&mut self.hpack, &mut self.buf, self.max_frame_size);
            }
            Frame::Priority(v) => {
                v.encode(&mut self.buf);
            }
            Frame::Reset(v) => {
                v.encode(&mut self.buf);
            }
            Frame::Settings(v) => {
                v.encode(&mut self.buf);
            }
            Frame::Ping(v) => {
                v.encode(&mut self.buf);
            }
            Frame::GoAway(v) => {
                v.encode(&mut self.buf);
            }
            Frame::WindowUpdate(v) => {
                v.encode(&mut self.buf);
            }
            Frame::Unknown(_) => {
                return Err(UserError::UnexpectedFrameType);
            }
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drains everything buffered so far for the transport to write.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}
