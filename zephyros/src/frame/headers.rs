use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::io::Cursor;

use crate::frame::{util, Error, Frame, Head, Kind, StreamDependency, StreamId};
use crate::hpack::{self, HeaderList, ListValidator};

/// A HEADERS frame, together with any CONTINUATION frames that completed its
/// header block. The raw block is decoded in a second step (`load_hpack`) once
/// END_HEADERS has been seen.
#[derive(Eq, PartialEq)]
pub struct Headers {
    stream_id: StreamId,
    stream_dep: Option<StreamDependency>,
    header_block: HeaderBlock,
    flags: HeadersFlag,
    pad_len: u8,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct HeadersFlag(u8);

/// A PUSH_PROMISE frame reserving `promised_id` on `stream_id`.
#[derive(Eq, PartialEq)]
pub struct PushPromise {
    stream_id: StreamId,
    promised_id: StreamId,
    header_block: HeaderBlock,
    flags: PushPromiseFlag,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PushPromiseFlag(u8);

#[derive(Debug, Default, Eq, PartialEq)]
struct HeaderBlock {
    fields: HeaderList,
    is_over_size: bool,
}

const END_STREAM: u8 = 0x1;
const END_HEADERS: u8 = 0x4;
const PADDED: u8 = 0x8;
const PRIORITY: u8 = 0x20;
const ALL: u8 = END_STREAM | END_HEADERS | PADDED | PRIORITY;

impl Headers {
    pub fn new(stream_id: StreamId, fields: HeaderList) -> Self {
        Headers {
            stream_id,
            stream_dep: None,
            header_block: HeaderBlock {
                fields,
                is_over_size: false,
            },
            flags: HeadersFlag::default(),
            pad_len: 0,
        }
    }

    pub(crate) fn load(head: Head, mut src: Bytes) -> Result<(Self, Bytes), Error> {
        let flags = HeadersFlag::load(head.flag());
        let mut pad = 0;

        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        tracing::trace!("loading headers; flags={:?}", flags);

        if flags.is_padded() {
            if src.is_empty() {
                return Err(Error::MalformedMessage);
            }
            pad = src[0] as usize;
            let _ = src.split_to(1);
        }

        let stream_dep = if flags.is_priority() {
            if src.len() < 5 {
                return Err(Error::MalformedMessage);
            }
            let stream_dep = StreamDependency::load(&src[..5])?;

            if stream_dep.dependency_id() == head.stream_id() {
                return Err(Error::InvalidDependencyId);
            }

            let _ = src.split_to(5);
            Some(stream_dep)
        } else {
            None
        };

        if pad > 0 {
            if pad > src.len() {
                return Err(Error::TooMuchPadding);
            }
            let len = src.len() - pad;
            src.truncate(len);
        }

        let headers = Headers {
            stream_id: head.stream_id(),
            stream_dep,
            header_block: HeaderBlock::default(),
            flags,
            pad_len: pad as u8,
        };

        Ok((headers, src))
    }

    /// Decodes the accumulated header block. Compression failures surface as
    /// connection-scoped errors; list validation failures as stream-scoped.
    pub(crate) fn load_hpack(
        &mut self,
        src: &mut BytesMut,
        max_header_list_size: usize,
        decoder: &mut hpack::Decoder,
    ) -> Result<(), Error> {
        self.header_block.load(src, max_header_list_size, decoder)
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn stream_dep(&self) -> Option<StreamDependency> {
        self.stream_dep
    }

    pub fn set_stream_dep(&mut self, dep: StreamDependency) {
        self.stream_dep = Some(dep);
        self.flags.set_priority();
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags.is_end_headers()
    }

    pub fn set_end_headers(&mut self) {
        self.flags.set_end_headers();
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags.is_end_stream()
    }

    pub fn set_end_stream(&mut self) {
        self.flags.set_end_stream()
    }

    pub fn set_pad_len(&mut self, pad_len: u8) {
        self.flags.set_padded();
        self.pad_len = pad_len;
    }

    pub fn pad_len(&self) -> u8 {
        self.pad_len
    }

    pub fn is_padded(&self) -> bool {
        self.flags.is_padded()
    }

    pub fn is_over_size(&self) -> bool {
        self.header_block.is_over_size
    }

    pub fn fields(&self) -> &HeaderList {
        &self.header_block.fields
    }

    pub fn fields_mut(&mut self) -> &mut HeaderList {
        &mut self.header_block.fields
    }

    pub fn into_fields(self) -> HeaderList {
        self.header_block.fields
    }

    /// Encodes this frame, fragmenting the header block into a HEADERS frame
    /// plus CONTINUATION frames so no payload exceeds `max_frame_size`.
    /// END_HEADERS is carried by the final fragment only.
    pub(crate) fn encode(
        mut self,
        encoder: &mut hpack::Encoder,
        dst: &mut BytesMut,
        max_frame_size: usize,
    ) {
        self.flags.set_end_headers();

        let mut block = BytesMut::new();
        encoder.encode(self.header_block.fields.iter(), &mut block);

        let mut prelude = BytesMut::new();
        if self.flags.is_padded() {
            prelude.put_u8(self.pad_len);
        }
        if let Some(dep) = self.stream_dep {
            dep.encode(&mut prelude);
        }

        let padding = if self.flags.is_padded() {
            self.pad_len as usize
        } else {
            0
        };

        debug_assert!(prelude.len() + padding < max_frame_size);

        let first_budget = max_frame_size - prelude.len() - padding;
        let first_len = block.len().min(first_budget);
        let first_chunk = block.split_to(first_len);
        let done = block.is_empty();

        let mut flags = self.flags;
        if !done {
            flags.unset_end_headers();
        }

        let head = Head::new(Kind::Headers, flags.into(), self.stream_id);
        head.encode(prelude.len() + first_chunk.len() + padding, dst);
        dst.put_slice(&prelude);
        dst.put_slice(&first_chunk);
        dst.put_bytes(0, padding);

        encode_continuations(self.stream_id, block, dst, max_frame_size);
    }
}

impl From<Headers> for Frame {
    fn from(src: Headers) -> Self {
        Frame::Headers(src)
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Headers");
        builder
            .field("stream_id", &self.stream_id)
            .field("flags", &self.flags);

        if let Some(ref dep) = self.stream_dep {
            builder.field("stream_dep", dep);
        }

        builder.finish()
    }
}

impl PushPromise {
    pub fn new(stream_id: StreamId, promised_id: StreamId, fields: HeaderList) -> Self {
        PushPromise {
            stream_id,
            promised_id,
            header_block: HeaderBlock {
                fields,
                is_over_size: false,
            },
            flags: PushPromiseFlag::default(),
        }
    }

    pub(crate) fn load(head: Head, mut src: Bytes) -> Result<(Self, Bytes), Error> {
        let flags = PushPromiseFlag(head.flag());
        let mut pad = 0;

        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        if flags.is_padded() {
            if src.is_empty() {
                return Err(Error::MalformedMessage);
            }
            pad = src[0] as usize;
            let _ = src.split_to(1);
        }

        if src.len() < 4 {
            return Err(Error::MalformedMessage);
        }

        let (promised_id, _) = StreamId::parse(&src[..4]);
        let _ = src.split_to(4);

        if promised_id.is_zero() {
            return Err(Error::InvalidStreamId);
        }

        if pad > 0 {
            if pad > src.len() {
                return Err(Error::TooMuchPadding);
            }
            let len = src.len() - pad;
            src.truncate(len);
        }

        let frame = PushPromise {
            stream_id: head.stream_id(),
            promised_id,
            header_block: HeaderBlock::default(),
            flags,
        };

        Ok((frame, src))
    }

    pub(crate) fn load_hpack(
        &mut self,
        src: &mut BytesMut,
        max_header_list_size: usize,
        decoder: &mut hpack::Decoder,
    ) -> Result<(), Error> {
        self.header_block.load(src, max_header_list_size, decoder)
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn promised_id(&self) -> StreamId {
        self.promised_id
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags.is_end_headers()
    }

    pub fn set_end_headers(&mut self) {
        self.flags.set_end_headers();
    }

    pub fn is_over_size(&self) -> bool {
        self.header_block.is_over_size
    }

    pub fn fields(&self) -> &HeaderList {
        &self.header_block.fields
    }

    pub fn into_fields(self) -> HeaderList {
        self.header_block.fields
    }

    pub(crate) fn encode(
        mut self,
        encoder: &mut hpack::Encoder,
        dst: &mut BytesMut,
        max_frame_size: usize,
    ) {
        self.flags.set_end_headers();

        let mut block = BytesMut::new();
        encoder.encode(self.header_block.fields.iter(), &mut block);

        debug_assert!(max_frame_size > 4);

        let first_budget = max_frame_size - 4;
        let first_len = block.len().min(first_budget);
        let first_chunk = block.split_to(first_len);

        let mut flags = self.flags;
        if !block.is_empty() {
            flags.unset_end_headers();
        }

        let head = Head::new(Kind::PushPromise, flags.into(), self.stream_id);
        head.encode(4 + first_chunk.len(), dst);
        dst.put_u32(self.promised_id.into());
        dst.put_slice(&first_chunk);

        encode_continuations(self.stream_id, block, dst, max_frame_size);
    }
}

impl From<PushPromise> for Frame {
    fn from(src: PushPromise) -> Self {
        Frame::PushPromise(src)
    }
}

impl fmt::Debug for PushPromise {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PushPromise")
            .field("stream_id", &self.stream_id)
            .field("promised_id", &self.promised_id)
            .field("flags", &self.flags)
            .finish()
    }
}

fn encode_continuations(
    stream_id: StreamId,
    mut block: BytesMut,
    dst: &mut BytesMut,
    max_frame_size: usize,
) {
    while !block.is_empty() {
        let len = block.len().min(max_frame_size);
        let chunk = block.split_to(len);
        let flags = if block.is_empty() { END_HEADERS } else { 0 };

        let head = Head::new(Kind::Continuation, flags, stream_id);
        head.encode(chunk.len(), dst);
        dst.put_slice(&chunk);
    }
}

impl HeaderBlock {
    fn load(
        &mut self,
        src: &mut BytesMut,
        max_header_list_size: usize,
        decoder: &mut hpack::Decoder,
    ) -> Result<(), Error> {
        let mut validator = ListValidator::new(max_header_list_size);
        let mut cursor = Cursor::new(src);

        let fields = &mut self.fields;
        let res = decoder.decode(&mut cursor, |field| {
            if validator.validate(&field) {
                fields.push(field);
            }
        });

        if let Err(e) = res {
            tracing::debug!("hpack decoding error; err={:?}", e);
            return Err(Error::Hpack(e));
        }

        self.is_over_size = validator.is_over_size();

        if let Err(e) = validator.finish() {
            tracing::debug!("malformed header block; err={:?}", e);
            return Err(Error::MalformedHeaderBlock(e));
        }

        Ok(())
    }
}

impl HeadersFlag {
    pub fn empty() -> HeadersFlag {
        HeadersFlag(0)
    }

    pub fn load(bits: u8) -> HeadersFlag {
        HeadersFlag(bits & ALL)
    }

    pub fn is_end_stream(&self) -> bool {
        self.0 & END_STREAM == END_STREAM
    }

    pub fn set_end_stream(&mut self) {
        self.0 |= END_STREAM;
    }

    pub fn is_end_headers(&self) -> bool {
        self.0 & END_HEADERS == END_HEADERS
    }

    pub fn set_end_headers(&mut self) {
        self.0 |= END_HEADERS;
    }

    pub fn unset_end_headers(&mut self) {
        self.0 &= !END_HEADERS;
    }

    pub fn is_padded(&self) -> bool {
        self.0 & PADDED == PADDED
    }

    pub fn set_padded(&mut self) {
        self.0 |= PADDED;
    }

    pub fn is_priority(&self) -> bool {
        self.0 & PRIORITY == PRIORITY
    }

    pub fn set_priority(&mut self) {
        self.0 |= PRIORITY;
    }
}

impl Default for HeadersFlag {
    fn default() -> Self {
        HeadersFlag(END_HEADERS)
    }
}

impl From<HeadersFlag> for u8 {
    fn from(src: HeadersFlag) -> u8 {
        src.0
    }
}

impl fmt::Debug for HeadersFlag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        util::fmt_flags(
            fmt,
            self.0,
            &[
                (self.is_end_headers(), "END_HEADERS"),
                (self.is_end_stream(), "END_STREAM"),
                (self.is_padded(), "PADDED"),
                (self.is_priority(), "PRIORITY"),
            ],
        )
    }
}

impl PushPromiseFlag {
    pub fn empty() -> PushPromiseFlag {
        PushPromiseFlag(0)
    }

    pub fn load(bits: u8) -> PushPromiseFlag {
        PushPromiseFlag(bits & ALL)
    }

    pub fn is_end_headers(&self) -> bool {
        self.0 & END_HEADERS == END_HEADERS
    }

    pub fn set_end_headers(&mut self) {
        self.0 |= END_HEADERS;
    }

    pub fn unset_end_headers(&mut self) {
        self.0 &= !END_HEADERS;
    }

    pub fn is_padded(&self) -> bool {
        self.0 & PADDED == PADDED
    }
}

impl Default for PushPromiseFlag {
    fn default() -> Self {
        PushPromiseFlag(END_HEADERS)
    }
}

impl From<PushPromiseFlag> for u8 {
    fn from(src: PushPromiseFlag) -> u8 {
        src.0
    }
}

impl fmt::Debug for PushPromiseFlag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        util::fmt_flags(
            fmt,
            self.0,
            &[
                (self.is_end_headers(), "END_HEADERS"),
                (self.is_padded(), "PADDED"),
            ],
        )
    }
}
