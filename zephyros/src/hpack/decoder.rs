use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use std::io::Cursor;

use crate::hpack::header::FieldKind;
use crate::hpack::table::{get_static, DynamicTable, STATIC_TABLE_LEN};
use crate::hpack::{huffman, integer, HeaderField, HuffmanError, IntegerError};

/// Decodes header block fragments into header fields, maintaining the
/// decoder-side dynamic table.
///
/// The decode pass walks representations one at a time:
/// read-representation, then (depending on the first byte) an indexed header,
/// an indexed name, a max-size update, or literal name/value strings, each
/// with its own length-prefix step.
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,

    /// Upper bound for size updates: the table size most recently advertised
    /// through SETTINGS.
    protocol_max_size: usize,

    /// Set when the local maximum was reduced below the table capacity; the
    /// next block must then open with a conforming size update.
    size_update_required: bool,

    /// Scratch for Huffman decoding.
    buffer: BytesMut,
}

/// Compression-level failures. All of these poison the connection's HPACK
/// state and are therefore connection errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecoderError {
    InvalidRepresentation,
    InvalidTableIndex,
    InvalidMaxDynamicSize,
    SizeUpdateRequired,
    IntegerOverflow,
    NeedMore,
    Huffman(HuffmanError),
}

enum Representation {
    Indexed,
    LiteralWithIndexing,
    LiteralWithoutIndexing,
    LiteralNeverIndexed,
    SizeUpdate,
}

impl Decoder {
    pub fn new(size: usize) -> Decoder {
        Decoder {
            table: DynamicTable::new(size),
            protocol_max_size: size,
            size_update_required: false,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Applies a HEADER_TABLE_SIZE change negotiated through SETTINGS. A
    /// reduction below the current capacity obliges the peer's encoder to
    /// open its next block with a size update.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.protocol_max_size = size;

        if size < self.table.capacity() {
            self.size_update_required = true;
            self.table.set_capacity(size);
        }
    }

    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    /// Decodes one complete header block, invoking `f` for each field in
    /// order. Dynamic-table mutations happen as fields are decoded, so the
    /// table stays in sync with the peer even if the caller later rejects the
    /// block.
    pub fn decode<F>(
        &mut self,
        src: &mut Cursor<&mut BytesMut>,
        mut f: F,
    ) -> Result<(), DecoderError>
    where
        F: FnMut(HeaderField),
    {
        use self::Representation::*;

        let span = tracing::trace_span!("hpack_decode");
        let _e = span.enter();

        let mut can_resize = true;

        while let Some(byte) = peek_u8(src) {
            match Representation::load(byte)? {
                Indexed => {
                    tracing::trace!(rem = src.remaining(), kind = %"Indexed");
                    self.expect_no_pending_resize()?;
                    can_resize = false;

                    let entry = self.decode_indexed(src)?;
                    f(entry);
                }
                LiteralWithIndexing => {
                    tracing::trace!(rem = src.remaining(), kind = %"LiteralWithIndexing");
                    self.expect_no_pending_resize()?;
                    can_resize = false;

                    let entry = self.decode_literal(src, 6)?;
                    self.table.add(entry.clone());
                    f(entry);
                }
                LiteralWithoutIndexing => {
                    tracing::trace!(rem = src.remaining(), kind = %"LiteralWithoutIndexing");
                    self.expect_no_pending_resize()?;
                    can_resize = false;

                    let entry = self.decode_literal(src, 4)?;
                    f(entry);
                }
                LiteralNeverIndexed => {
                    tracing::trace!(rem = src.remaining(), kind = %"LiteralNeverIndexed");
                    self.expect_no_pending_resize()?;
                    can_resize = false;

                    let entry = self.decode_literal(src, 4)?;
                    f(HeaderField::sensitive(
                        entry.name().clone(),
                        entry.value().clone(),
                    ));
                }
                SizeUpdate => {
                    tracing::trace!(rem = src.remaining(), kind = %"SizeUpdate");
                    if !can_resize {
                        return Err(DecoderError::InvalidMaxDynamicSize);
                    }

                    self.process_size_update(src)?;
                }
            }
        }

        Ok(())
    }

    fn expect_no_pending_resize(&self) -> Result<(), DecoderError> {
        if self.size_update_required {
            tracing::debug!("max dynamic table size change required");
            return Err(DecoderError::SizeUpdateRequired);
        }
        Ok(())
    }

    fn process_size_update(&mut self, buf: &mut Cursor<&mut BytesMut>) -> Result<(), DecoderError> {
        let new_size = integer::decode_int(buf, 5)? as usize;

        if new_size > self.protocol_max_size {
            return Err(DecoderError::InvalidMaxDynamicSize);
        }

        tracing::debug!(
            from = self.table.capacity(),
            to = new_size,
            "peer changed max table size"
        );

        self.size_update_required = false;
        self.table.set_capacity(new_size);

        Ok(())
    }

    fn decode_indexed(&self, buf: &mut Cursor<&mut BytesMut>) -> Result<HeaderField, DecoderError> {
        let index = integer::decode_int(buf, 7)? as usize;
        self.get_entry(index)
    }

    fn decode_literal(
        &mut self,
        buf: &mut Cursor<&mut BytesMut>,
        prefix: u8,
    ) -> Result<HeaderField, DecoderError> {
        let table_index = integer::decode_int(buf, prefix)? as usize;

        if table_index == 0 {
            let name = self.decode_string(buf)?;
            let value = self.decode_string(buf)?;

            Ok(HeaderField::new(name, value))
        } else {
            let entry = self.get_entry(table_index)?;
            let value = self.decode_string(buf)?;

            Ok(entry.with_value(value))
        }
    }

    fn get_entry(&self, index: usize) -> Result<HeaderField, DecoderError> {
        if index == 0 {
            return Err(DecoderError::InvalidTableIndex);
        }

        if index <= STATIC_TABLE_LEN {
            return Ok(get_static(index));
        }

        self.table
            .get(index - STATIC_TABLE_LEN)
            .cloned()
            .ok_or(DecoderError::InvalidTableIndex)
    }

    fn decode_string(&mut self, buf: &mut Cursor<&mut BytesMut>) -> Result<Bytes, DecoderError> {
        const HUFF_FLAG: u8 = 0b1000_0000;

        let huff = match peek_u8(buf) {
            Some(byte) => byte & HUFF_FLAG == HUFF_FLAG,
            None => return Err(DecoderError::NeedMore),
        };

        let len = integer::decode_int(buf, 7)? as usize;

        if len > buf.remaining() {
            tracing::trace!(len, remaining = buf.remaining(), "string underflow");
            return Err(DecoderError::NeedMore);
        }

        if huff {
            let decoded = {
                let raw = &buf.chunk()[..len];
                huffman::decode(raw, &mut self.buffer).map(BytesMut::freeze)
            };

            buf.advance(len);
            return decoded.map_err(DecoderError::Huffman);
        }

        Ok(take(buf, len))
    }
}

impl Default for Decoder {
    fn default() -> Decoder {
        Decoder::new(4096)
    }
}

impl Representation {
    fn load(byte: u8) -> Result<Representation, DecoderError> {
        const INDEXED: u8 = 0b1000_0000;
        const LITERAL_WITH_INDEXING: u8 = 0b0100_0000;
        const LITERAL_WITHOUT_INDEXING: u8 = 0b1111_0000;
        const LITERAL_NEVER_INDEXED: u8 = 0b0001_0000;
        const SIZE_UPDATE_MASK: u8 = 0b1110_0000;
        const SIZE_UPDATE: u8 = 0b0010_0000;

        if byte & INDEXED == INDEXED {
            Ok(Representation::Indexed)
        } else if byte & LITERAL_WITH_INDEXING == LITERAL_WITH_INDEXING {
            Ok(Representation::LiteralWithIndexing)
        } else if byte & LITERAL_WITHOUT_INDEXING == 0 {
            Ok(Representation::LiteralWithoutIndexing)
        } else if byte & LITERAL_WITHOUT_INDEXING == LITERAL_NEVER_INDEXED {
            Ok(Representation::LiteralNeverIndexed)
        } else if byte & SIZE_UPDATE_MASK == SIZE_UPDATE {
            Ok(Representation::SizeUpdate)
        } else {
            Err(DecoderError::InvalidRepresentation)
        }
    }
}

fn peek_u8(buf: &Cursor<&mut BytesMut>) -> Option<u8> {
    let pos = buf.position() as usize;
    buf.get_ref().get(pos).copied()
}

fn take(buf: &mut Cursor<&mut BytesMut>, n: usize) -> Bytes {
    let pos = buf.position() as usize;
    let mut head = buf.get_mut().split_to(pos + n);
    buf.set_position(0);
    head.advance(pos);
    head.freeze()
}

impl From<IntegerError> for DecoderError {
    fn from(src: IntegerError) -> DecoderError {
        match src {
            IntegerError::Overflow => DecoderError::IntegerOverflow,
            IntegerError::Underflow => DecoderError::NeedMore,
        }
    }
}

impl fmt::Display for DecoderError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::DecoderError::*;

        match *self {
            InvalidRepresentation => fmt.write_str("invalid header representation"),
            InvalidTableIndex => fmt.write_str("invalid header table index"),
            InvalidMaxDynamicSize => fmt.write_str("invalid max dynamic table size"),
            SizeUpdateRequired => fmt.write_str("max dynamic table size change required"),
            IntegerOverflow => fmt.write_str("integer overflow"),
            NeedMore => fmt.write_str("unexpected end of header block"),
            Huffman(_) => fmt.write_str("invalid huffman string"),
        }
    }
}

impl std::error::Error for DecoderError {}

/// Header-list validation per block: pseudo-header placement, request and
/// response pseudo sets kept disjoint, name validity, and the cumulative size
/// bound.
///
/// Violations are latched rather than raised mid-block so the dynamic table
/// progresses identically on both peers; `finish` reports the first one.
#[derive(Debug)]
pub struct ListValidator {
    max_list_size: usize,
    seen_regular: bool,
    pseudo_kind: Option<FieldKind>,
    list_size: usize,
    over_size: bool,
    malformed: Option<ValidationError>,
}

/// Per-block violations. These leave compression state intact and are stream
/// errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValidationError {
    PseudoAfterRegular,
    MixedPseudoHeaders,
    UnknownPseudoHeader,
    InvalidHeaderName,
    HeaderListTooLarge,
}

impl ListValidator {
    pub fn new(max_list_size: usize) -> ListValidator {
        ListValidator {
            max_list_size,
            seen_regular: false,
            pseudo_kind: None,
            list_size: 0,
            over_size: false,
            malformed: None,
        }
    }

    /// Validates one decoded field. Returns whether the field fits within the
    /// list size bound (callers drop fields once the bound is crossed).
    pub fn validate(&mut self, field: &HeaderField) -> bool {
        self.list_size += field.size();
        if self.list_size > self.max_list_size && !self.over_size {
            tracing::trace!(
                size = self.list_size,
                max = self.max_list_size,
                "header list over max size"
            );
            self.over_size = true;
        }

        if !field.has_valid_name() {
            self.latch(ValidationError::InvalidHeaderName);
            return !self.over_size;
        }

        match field.kind() {
            FieldKind::Regular => {
                self.seen_regular = true;
            }
            FieldKind::UnknownPseudo => {
                self.latch(ValidationError::UnknownPseudoHeader);
            }
            kind => {
                if self.seen_regular {
                    self.latch(ValidationError::PseudoAfterRegular);
                } else {
                    match self.pseudo_kind {
                        Some(seen) if seen != kind => {
                            self.latch(ValidationError::MixedPseudoHeaders);
                        }
                        _ => self.pseudo_kind = Some(kind),
                    }
                }
            }
        }

        !self.over_size
    }

    pub fn finish(self) -> Result<(), ValidationError> {
        if let Some(err) = self.malformed {
            return Err(err);
        }
        if self.over_size {
            return Err(ValidationError::HeaderListTooLarge);
        }
        Ok(())
    }

    pub fn is_over_size(&self) -> bool {
        self.over_size
    }

    fn latch(&mut self, err: ValidationError) {
        if self.malformed.is_none() {
            tracing::trace!("malformed header block; {:?}", err);
            self.malformed = Some(err);
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::ValidationError::*;

        fmt.write_str(match *self {
            PseudoAfterRegular => "pseudo-header after regular header",
            MixedPseudoHeaders => "mixed request and response pseudo-headers",
            UnknownPseudoHeader => "unknown pseudo-header",
            InvalidHeaderName => "invalid header field name",
            HeaderListTooLarge => "header list exceeds maximum size",
        })
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_block(decoder: &mut Decoder, src: &[u8]) -> Result<Vec<HeaderField>, DecoderError> {
        let mut buf = BytesMut::from(src);
        let mut cursor = Cursor::new(&mut buf);
        let mut fields = Vec::new();
        decoder.decode(&mut cursor, |field| fields.push(field))?;
        Ok(fields)
    }

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn rfc7541_c3_first_request() {
        let mut decoder = Decoder::new(4096);
        let fields = decode_block(
            &mut decoder,
            &hex("828684410f7777772e6578616d706c652e636f6d"),
        )
        .unwrap();

        let expect: Vec<(&[u8], &[u8])> = vec![
            (b":method", b"GET"),
            (b":scheme", b"http"),
            (b":path", b"/"),
            (b":authority", b"www.example.com"),
        ];
        let got: Vec<(&[u8], &[u8])> = fields
            .iter()
            .map(|f| (&f.name()[..], &f.value()[..]))
            .collect();
        assert_eq!(got, expect);

        assert_eq!(decoder.table_len(), 1);
        assert_eq!(decoder.table_size(), 57);
    }

    #[test]
    fn rfc7541_c4_first_request_huffman() {
        let mut decoder = Decoder::new(4096);
        let fields =
            decode_block(&mut decoder, &hex("828684418cf1e3c2e5f23a6ba0ab90f4ff")).unwrap();

        assert_eq!(fields.len(), 4);
        assert_eq!(fields[3].name(), &b":authority"[..]);
        assert_eq!(fields[3].value(), &b"www.example.com"[..]);

        assert_eq!(decoder.table_len(), 1);
        assert_eq!(decoder.table_size(), 57);
    }

    #[test]
    fn rfc7541_c5_three_responses_with_eviction() {
        let mut decoder = Decoder::new(256);

        // C.5.1
        let fields = decode_block(
            &mut decoder,
            &hex(
                "4803333032580770726976617465611d4d6f6e2c203231204f637420323031332032303a31333a323\
                 120474d546e1768747470733a2f2f7777772e6578616d706c652e636f6d",
            ),
        )
        .unwrap();
        assert_eq!(fields.len(), 4);
        assert_eq!(decoder.table_len(), 4);
        assert_eq!(decoder.table_size(), 222);

        // C.5.2 — evicts the oldest entry (:status 302).
        let fields = decode_block(&mut decoder, &hex("4803333037c1c0bf")).unwrap();
        assert_eq!(fields.len(), 4);
        assert_eq!(decoder.table_len(), 4);
        assert_eq!(decoder.table_size(), 222);

        // C.5.3 — evicts two more.
        let fields = decode_block(
            &mut decoder,
            &hex(
                "88c1611d4d6f6e2c203231204f637420323031332032303a31333a323220474d54c05a04677a6970\
                 7738666f6f3d4153444a4b48514b425a584f5157454f50495541585157454f49553b206d61782d61\
                 67653d333630303b2076657273696f6e3d31",
            ),
        )
        .unwrap();
        assert_eq!(fields.len(), 6);

        assert_eq!(decoder.table_len(), 3);
        assert_eq!(decoder.table_size(), 215);

        // Final table order: newest first.
        let mut buf = BytesMut::from(&hex("bebfc0")[..]);
        let mut cursor = Cursor::new(&mut buf);
        let mut names = Vec::new();
        decoder
            .decode(&mut cursor, |f| names.push(f.name().clone()))
            .unwrap();
        assert_eq!(
            names,
            vec![
                Bytes::from_static(b"set-cookie"),
                Bytes::from_static(b"content-encoding"),
                Bytes::from_static(b"date"),
            ]
        );
    }

    #[test]
    fn index_zero_is_an_error() {
        let mut decoder = Decoder::new(4096);
        assert_eq!(
            decode_block(&mut decoder, &[0x80]),
            Err(DecoderError::InvalidTableIndex)
        );
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let mut decoder = Decoder::new(4096);
        // Index 62 with an empty dynamic table.
        assert_eq!(
            decode_block(&mut decoder, &[0xbe]),
            Err(DecoderError::InvalidTableIndex)
        );
    }

    #[test]
    fn size_update_only_at_block_start() {
        let mut decoder = Decoder::new(4096);
        // Indexed :method GET, then a size update.
        assert_eq!(
            decode_block(&mut decoder, &[0x82, 0x20]),
            Err(DecoderError::InvalidMaxDynamicSize)
        );

        // Two consecutive size updates at the start are fine.
        let mut decoder = Decoder::new(4096);
        decode_block(&mut decoder, &[0x20, 0x3f, 0xe1, 0x1f, 0x82]).unwrap();
    }

    #[test]
    fn size_update_above_protocol_max_rejected() {
        let mut decoder = Decoder::new(4096);
        // 0x3f 0xe2 0x1f => 5-bit prefix integer 4128 > 4096.
        assert_eq!(
            decode_block(&mut decoder, &[0x3f, 0xe2, 0x1f]),
            Err(DecoderError::InvalidMaxDynamicSize)
        );
    }

    #[test]
    fn reduction_requires_leading_size_update() {
        let mut decoder = Decoder::new(4096);
        decoder.set_max_table_size(1024);

        assert_eq!(
            decode_block(&mut decoder, &[0x82]),
            Err(DecoderError::SizeUpdateRequired)
        );

        // A conforming update clears the requirement.
        let mut decoder = Decoder::new(4096);
        decoder.set_max_table_size(1024);
        let fields = decode_block(&mut decoder, &[0x20, 0x82]).unwrap();
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn duplicate_literal_creates_two_entries() {
        let mut decoder = Decoder::new(4096);
        let block = hex("400a637573746f6d2d6b65790d637573746f6d2d686561646572");
        let mut twice = block.clone();
        twice.extend_from_slice(&block);

        let fields = decode_block(&mut decoder, &twice).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(decoder.table_len(), 2);

        // Both copies are reachable by index 62 and 63.
        let fields = decode_block(&mut decoder, &[0xbe, 0xbf]).unwrap();
        assert_eq!(fields[0], fields[1]);
    }

    #[test]
    fn truncated_literal_is_an_error() {
        let mut decoder = Decoder::new(4096);
        let block = hex("400a637573746f6d2d6b6579");
        assert_eq!(
            decode_block(&mut decoder, &block),
            Err(DecoderError::NeedMore)
        );
    }

    #[test]
    fn validator_rejects_pseudo_after_regular() {
        let mut v = ListValidator::new(usize::MAX);
        assert!(v.validate(&HeaderField::new(&b"accept"[..], &b"*/*"[..])));
        assert!(v.validate(&HeaderField::new(&b":method"[..], &b"GET"[..])));
        assert_eq!(v.finish(), Err(ValidationError::PseudoAfterRegular));
    }

    #[test]
    fn validator_rejects_mixed_pseudo_sets() {
        let mut v = ListValidator::new(usize::MAX);
        v.validate(&HeaderField::new(&b":method"[..], &b"GET"[..]));
        v.validate(&HeaderField::new(&b":status"[..], &b"200"[..]));
        assert_eq!(v.finish(), Err(ValidationError::MixedPseudoHeaders));
    }

    #[test]
    fn validator_rejects_unknown_pseudo() {
        let mut v = ListValidator::new(usize::MAX);
        v.validate(&HeaderField::new(&b":shrug"[..], &b""[..]));
        assert_eq!(v.finish(), Err(ValidationError::UnknownPseudoHeader));
    }

    #[test]
    fn validator_rejects_uppercase_names() {
        let mut v = ListValidator::new(usize::MAX);
        v.validate(&HeaderField::new(&b"X-Custom"[..], &b"1"[..]));
        assert_eq!(v.finish(), Err(ValidationError::InvalidHeaderName));
    }

    #[test]
    fn validator_latches_oversize_until_finish() {
        // ":method: GET" weighs 42; a 50-octet bound admits one field only.
        let mut v = ListValidator::new(50);
        assert!(v.validate(&HeaderField::new(&b":method"[..], &b"GET"[..])));
        assert!(!v.validate(&HeaderField::new(&b"accept"[..], &b"*/*"[..])));
        assert!(v.is_over_size());
        assert_eq!(v.finish(), Err(ValidationError::HeaderListTooLarge));
    }

    #[test]
    fn validator_accepts_ordinary_blocks() {
        let mut v = ListValidator::new(usize::MAX);
        v.validate(&HeaderField::new(&b":method"[..], &b"GET"[..]));
        v.validate(&HeaderField::new(&b":path"[..], &b"/"[..]));
        v.validate(&HeaderField::new(&b"accept"[..], &b"*/*"[..]));
        assert!(v.finish().is_ok());
    }
}
