use bytes::{Buf, BytesMut};

use crate::error::Http2Error;
use crate::frame::{
    self, Frame, Head, Kind, Reason, StreamId, UnknownFrame, DEFAULT_MAX_FRAME_SIZE, HEADER_LEN,
};
use crate::hpack;

/// Parses frames out of an ever-growing input buffer.
///
/// Whole frames are handed out one at a time; bytes of an incomplete frame
/// stay buffered until more input arrives. The reader owns the inbound HPACK
/// decoder and folds CONTINUATION frames into their owning HEADERS or
/// PUSH_PROMISE, so only complete, decoded frames emerge.
#[derive(Debug)]
pub struct FrameReader {
    buf: BytesMut,

    /// The advertised (and acknowledged) bound on what the peer may send.
    max_frame_size: u32,
    max_header_list_size: usize,

    hpack: hpack::Decoder,

    /// An open HEADERS/PUSH_PROMISE sequence awaiting END_HEADERS. While set,
    /// only CONTINUATION frames for the same stream are admissible.
    partial: Option<Partial>,
}

#[derive(Debug)]
struct Partial {
    frame: Continuable,
    block: BytesMut,
}

#[derive(Debug)]
enum Continuable {
    Headers(frame::Headers),
    PushPromise(frame::PushPromise),
}

impl FrameReader {
    pub fn new(header_table_size: usize, max_header_list_size: usize) -> FrameReader {
        FrameReader {
            buf: BytesMut::with_capacity(4096),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size,
            hpack: hpack::Decoder::new(header_table_size),
            partial: None,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn set_max_frame_size(&mut self, val: u32) {
        debug_assert!((DEFAULT_MAX_FRAME_SIZE..=frame::MAX_MAX_FRAME_SIZE).contains(&val));
        self.max_frame_size = val;
    }

    pub fn set_max_header_list_size(&mut self, val: usize) {
        self.max_header_list_size = val;
    }

    pub fn set_header_table_size(&mut self, val: usize) {
        self.hpack.set_max_table_size(val);
    }

    pub fn in_header_sequence(&self) -> bool {
        self.partial.is_some()
    }

    /// Parses the next complete frame, or `None` when more bytes are needed.
    ///
    /// The input buffer only advances past a frame once it parsed cleanly, so
    /// retrying after an error re-reads the same bytes and reproduces the
    /// same error.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, Http2Error> {
        loop {
            if self.buf.len() < HEADER_LEN {
                return Ok(None);
            }

            let length =
                ((self.buf[0] as u32) << 16) | ((self.buf[1] as u32) << 8) | self.buf[2] as u32;

            if length > self.max_frame_size {
                tracing::debug!(length, max = self.max_frame_size, "frame too large");
                return Err(Http2Error::connection(
                    Reason::FRAME_SIZE_ERROR,
                    "frame exceeds max frame size",
                ));
            }

            if self.buf.len() < HEADER_LEN + length as usize {
                return Ok(None);
            }

            let head = Head::parse(&self.buf[..HEADER_LEN]);
            let raw_type = self.buf[3];
            let payload =
                bytes::Bytes::copy_from_slice(&self.buf[HEADER_LEN..HEADER_LEN + length as usize]);

            tracing::trace!("read frame; kind={:?} len={}", head.kind(), length);

            // While a header sequence is open, nothing but its continuations
            // may appear, on any stream.
            if self.partial.is_some() && head.kind() != Kind::Continuation {
                return Err(Http2Error::connection(
                    Reason::PROTOCOL_ERROR,
                    "expected CONTINUATION",
                ));
            }

            let parsed = self.parse_payload(head, raw_type, payload)?;
            self.buf.advance(HEADER_LEN + length as usize);

            match parsed {
                Some(frame) => return Ok(Some(frame)),
                None => continue,
            }
        }
    }

    fn parse_payload(
        &mut self,
        head: Head,
        raw_type: u8,
        payload: bytes::Bytes,
    ) -> Result<Option<Frame>, Http2Error> {
        {
            match head.kind() {
                // Arms that complete a frame return it; HEADERS/PUSH_PROMISE
                // without END_HEADERS and interior CONTINUATION fall through,
                // asking the caller for the next frame.
                Kind::Data => {
                    let frame =
                        frame::Data::load(head, payload).map_err(|e| framing_error(e, head))?;
                    return Ok(Some(frame.into()));
                }
                Kind::Headers => {
                    let (frame, block) = frame::Headers::load(head, payload)
                        .map_err(|e| framing_error(e, head))?;

                    if let Some(frame) = self.begin_or_finish(Continuable::Headers(frame), block)? {
                        return Ok(Some(frame));
                    }
                }
                Kind::Priority => {
                    let frame = frame::Priority::load(head, &payload)
                        .map_err(|e| framing_error(e, head))?;
                    return Ok(Some(frame.into()));
                }
                Kind::Reset => {
                    let frame =
                        frame::Reset::load(head, &payload).map_err(|e| framing_error(e, head))?;
                    return Ok(Some(frame.into()));
                }
                Kind::Settings => {
                    let frame = frame::Settings::load(head, &payload)
                        .map_err(|e| framing_error(e, head))?;
                    return Ok(Some(frame.into()));
                }
                Kind::PushPromise => {
                    let (frame, block) = frame::PushPromise::load(head, payload)
                        .map_err(|e| framing_error(e, head))?;

                    if let Some(frame) =
                        self.begin_or_finish(Continuable::PushPromise(frame), block)?
                    {
                        return Ok(Some(frame));
                    }
                }
                Kind::Ping => {
                    let frame =
                        frame::Ping::load(head, &payload).map_err(|e| framing_error(e, head))?;
                    return Ok(Some(frame.into()));
                }
                Kind::GoAway => {
                    let frame =
                        frame::GoAway::load(head, &payload).map_err(|e| framing_error(e, head))?;
                    return Ok(Some(frame.into()));
                }
                Kind::WindowUpdate => {
                    let frame = frame::WindowUpdate::load(head, &payload)
                        .map_err(|e| framing_error(e, head))?;
                    return Ok(Some(frame.into()));
                }
                Kind::Continuation => {
                    if let Some(frame) = self.recv_continuation(head, &payload)? {
                        return Ok(Some(frame));
                    }
                }
                Kind::Unknown => {
                    return Ok(Some(Frame::Unknown(UnknownFrame {
                        kind: raw_type,
                        flags: head.flag(),
                        stream_id: head.stream_id(),
                        payload,
                    })));
                }
            }
        }

        Ok(None)
    }

    fn begin_or_finish(
        &mut self,
        frame: Continuable,
        block: bytes::Bytes,
    ) -> Result<Option<Frame>, Http2Error> {
        let mut partial = Partial {
            frame,
            block: BytesMut::from(&block[..]),
        };

        if partial.is_end_headers() {
            return self.finish_partial(partial).map(Some);
        }

        self.partial = Some(partial);
        Ok(None)
    }

    fn recv_continuation(
        &mut self,
        head: Head,
        payload: &[u8],
    ) -> Result<Option<Frame>, Http2Error> {
        if self.partial.is_none() {
            return Err(Http2Error::connection(
                Reason::PROTOCOL_ERROR,
                "CONTINUATION without open header sequence",
            ));
        }

        if head.stream_id() != self.partial.as_ref().expect("checked").stream_id() {
            return Err(Http2Error::connection(
                Reason::PROTOCOL_ERROR,
                "CONTINUATION on wrong stream",
            ));
        }

        let mut partial = self.partial.take().expect("checked");
        partial.block.extend_from_slice(payload);

        const END_HEADERS: u8 = 0x4;
        if head.flag() & END_HEADERS == END_HEADERS {
            return self.finish_partial(partial).map(Some);
        }

        self.partial = Some(partial);
        Ok(None)
    }

    fn finish_partial(&mut self, mut partial: Partial) -> Result<Frame, Http2Error> {
        let stream_id = partial.stream_id();

        match partial.frame {
            Continuable::Headers(ref mut frame) => {
                frame.set_end_headers();
                frame
                    .load_hpack(&mut partial.block, self.max_header_list_size, &mut self.hpack)
                    .map_err(|e| block_error(e, stream_id))?;
            }
            Continuable::PushPromise(ref mut frame) => {
                frame.set_end_headers();
                frame
                    .load_hpack(&mut partial.block, self.max_header_list_size, &mut self.hpack)
                    .map_err(|e| block_error(e, stream_id))?;
            }
        }

        Ok(match partial.frame {
            Continuable::Headers(frame) => frame.into(),
            Continuable::PushPromise(frame) => frame.into(),
        })
    }
}

impl Partial {
    fn stream_id(&self) -> StreamId {
        match self.frame {
            Continuable::Headers(ref frame) => frame.stream_id(),
            Continuable::PushPromise(ref frame) => frame.stream_id(),
        }
    }

    fn is_end_headers(&self) -> bool {
        match self.frame {
            Continuable::Headers(ref frame) => frame.is_end_headers(),
            Continuable::PushPromise(ref frame) => frame.is_end_headers(),
        }
    }
}

/// Translates a framing failure into its protocol scope. `head` supplies the
/// frame kind and stream id for scoping decisions.
fn framing_error(err: frame::Error, head: Head) -> Http2Error {
    use frame::Error::*;

    match err {
        // A PRIORITY frame of the wrong size poisons only its stream; every
        // other fixed-size violation poisons the framing layer.
        InvalidPayloadLength if head.kind() == Kind::Priority && !head.stream_id().is_zero() => {
            Http2Error::stream(head.stream_id(), Reason::FRAME_SIZE_ERROR, "bad PRIORITY length")
        }
        BadFrameSize | InvalidPayloadLength | InvalidPayloadAckSettings => {
            Http2Error::connection(Reason::FRAME_SIZE_ERROR, "frame with invalid size")
        }
        InvalidInitialWindowSize => Http2Error::connection(
            Reason::FLOW_CONTROL_ERROR,
            "initial window size exceeds maximum",
        ),
        TooMuchPadding | InvalidSettingValue | InvalidStreamId | InvalidDependencyId
        | MalformedMessage => Http2Error::connection(Reason::PROTOCOL_ERROR, "malformed frame"),
        InvalidWindowUpdateValue => {
            // Increment of zero; scoped by the frame's own stream id.
            if head.stream_id().is_zero() {
                Http2Error::connection(Reason::PROTOCOL_ERROR, "zero window increment")
            } else {
                Http2Error::stream(
                    head.stream_id(),
                    Reason::PROTOCOL_ERROR,
                    "zero window increment",
                )
            }
        }
        Hpack(_) => Http2Error::connection(Reason::COMPRESSION_ERROR, "header block error"),
        MalformedHeaderBlock(_) => {
            Http2Error::stream(head.stream_id(), Reason::PROTOCOL_ERROR, "bad header block")
        }
    }
}

/// Translates a header-block decode failure. Compression failures poison the
/// connection; list validation failures only the stream.
fn block_error(err: frame::Error, stream_id: StreamId) -> Http2Error {
    match err {
        frame::Error::Hpack(e) => {
            Http2Error::connection(Reason::COMPRESSION_ERROR, format!("hpack: {}", e))
        }
        frame::Error::MalformedHeaderBlock(e) => {
            Http2Error::stream(stream_id, Reason::PROTOCOL_ERROR, format!("headers: {}", e))
        }
        other => Http2Error::connection(Reason::PROTOCOL_ERROR, format!("headers: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::{HeaderField, HeaderList};
    use bytes::BufMut;

    fn reader() -> FrameReader {
        FrameReader::new(4096, usize::MAX)
    }

    fn ping_bytes(payload: [u8; 8]) -> Vec<u8> {
        let mut dst = Vec::new();
        frame::Ping::new(payload).encode(&mut dst);
        dst
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut reader = reader();
        let bytes = ping_bytes(*b"pingpong");

        reader.extend(&bytes[..4]);
        assert!(reader.next_frame().unwrap().is_none());

        reader.extend(&bytes[4..12]);
        assert!(reader.next_frame().unwrap().is_none());

        reader.extend(&bytes[12..]);
        match reader.next_frame().unwrap().unwrap() {
            Frame::Ping(ping) => assert_eq!(ping.payload(), b"pingpong"),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn multiple_frames_per_feed() {
        let mut reader = reader();
        let mut bytes = ping_bytes(*b"00000000");
        bytes.extend(ping_bytes(*b"11111111"));
        reader.extend(&bytes);

        assert!(matches!(
            reader.next_frame().unwrap().unwrap(),
            Frame::Ping(_)
        ));
        assert!(matches!(
            reader.next_frame().unwrap().unwrap(),
            Frame::Ping(_)
        ));
        assert!(reader.next_frame().unwrap().is_none());
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn oversized_frame_is_connection_error() {
        let mut reader = reader();
        let mut bytes = Vec::new();
        // Length 16385 with the default max of 16384.
        Head::new(Kind::Data, 0, StreamId::from(1)).encode(16_385, &mut bytes);
        reader.extend(&bytes);

        let err = reader.next_frame().unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.reason(), Reason::FRAME_SIZE_ERROR);
    }

    #[test]
    fn error_is_idempotent_across_retries() {
        let mut reader = reader();
        let mut bytes = Vec::new();
        Head::new(Kind::Data, 0, StreamId::from(1)).encode(16_385, &mut bytes);
        reader.extend(&bytes);

        let first = reader.next_frame().unwrap_err();
        let second = reader.next_frame().unwrap_err();
        assert_eq!(first, second);
    }

    #[test]
    fn data_on_stream_zero_rejected() {
        let mut reader = reader();
        let mut bytes = Vec::new();
        Head::new(Kind::Data, 0, StreamId::ZERO).encode(2, &mut bytes);
        bytes.put_slice(b"hi");
        reader.extend(&bytes);

        let err = reader.next_frame().unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
    }

    fn headers_frames(end_headers: bool) -> Vec<u8> {
        let mut fields = HeaderList::new();
        fields.push(HeaderField::new(&b":method"[..], &b"GET"[..]));
        fields.push(HeaderField::new(&b":path"[..], &b"/"[..]));
        let headers = frame::Headers::new(StreamId::from(1), fields);

        let mut encoder = hpack::Encoder::new(4096);
        let mut dst = BytesMut::new();
        headers.encode(&mut encoder, &mut dst, 16_384);

        let mut bytes = dst.to_vec();
        if !end_headers {
            // Clear END_HEADERS on the lone frame to leave the sequence open.
            bytes[4] &= !0x4;
        }
        bytes
    }

    #[test]
    fn headers_with_end_headers_decode_immediately() {
        let mut reader = reader();
        reader.extend(&headers_frames(true));

        match reader.next_frame().unwrap().unwrap() {
            Frame::Headers(headers) => {
                assert_eq!(headers.fields().len(), 2);
                assert!(headers.is_end_headers());
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn open_header_sequence_excludes_other_frames() {
        let mut reader = reader();
        reader.extend(&headers_frames(false));
        assert!(reader.next_frame().unwrap().is_none());
        assert!(reader.in_header_sequence());

        reader.extend(&ping_bytes(*b"pingpong"));
        let err = reader.next_frame().unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
    }

    #[test]
    fn continuation_on_wrong_stream_rejected() {
        let mut reader = reader();
        reader.extend(&headers_frames(false));
        assert!(reader.next_frame().unwrap().is_none());

        let mut bytes = Vec::new();
        Head::new(Kind::Continuation, 0x4, StreamId::from(3)).encode(0, &mut bytes);
        reader.extend(&bytes);

        let err = reader.next_frame().unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn continuation_completes_header_sequence() {
        let mut reader = reader();
        reader.extend(&headers_frames(false));
        assert!(reader.next_frame().unwrap().is_none());

        // An empty terminal CONTINUATION carrying END_HEADERS.
        let mut bytes = Vec::new();
        Head::new(Kind::Continuation, 0x4, StreamId::from(1)).encode(0, &mut bytes);
        reader.extend(&bytes);

        match reader.next_frame().unwrap().unwrap() {
            Frame::Headers(headers) => assert_eq!(headers.fields().len(), 2),
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(!reader.in_header_sequence());
    }

    #[test]
    fn bare_continuation_rejected() {
        let mut reader = reader();
        let mut bytes = Vec::new();
        Head::new(Kind::Continuation, 0x4, StreamId::from(1)).encode(0, &mut bytes);
        reader.extend(&bytes);

        let err = reader.next_frame().unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
    }

    #[test]
    fn unknown_frame_surfaced() {
        let mut reader = reader();
        let mut bytes = vec![0x00, 0x00, 0x03, 0xfa, 0x07, 0x00, 0x00, 0x00, 0x05];
        bytes.extend_from_slice(b"abc");
        reader.extend(&bytes);

        match reader.next_frame().unwrap().unwrap() {
            Frame::Unknown(unknown) => {
                assert_eq!(unknown.kind, 0xfa);
                assert_eq!(unknown.flags, 0x07);
                assert_eq!(unknown.stream_id, StreamId::from(5));
                assert_eq!(&unknown.payload[..], b"abc");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
