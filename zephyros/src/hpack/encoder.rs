use bytes::{BufMut, BytesMut};

use crate::hpack::table::{find_static, DynamicTable, STATIC_TABLE_LEN};
use crate::hpack::{huffman, integer, HeaderField};

/// Encodes header lists into header block fragments, maintaining the
/// encoder-side dynamic table.
///
/// Representation policy, per header: sensitive fields use the never-indexed
/// literal; a full (name, value) table match uses the indexed representation;
/// a name-only match uses a literal with incremental indexing by name index;
/// anything else a literal with incremental indexing and a literal name. The
/// two incremental forms insert into the dynamic table.
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    size_update: Option<SizeUpdate>,
    huffman_enabled: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SizeUpdate {
    One(usize),
    Two(usize, usize), // min, then final
}

impl Encoder {
    pub fn new(max_size: usize) -> Encoder {
        Encoder {
            table: DynamicTable::new(max_size),
            size_update: None,
            huffman_enabled: true,
        }
    }

    pub fn set_huffman_enabled(&mut self, enabled: bool) {
        self.huffman_enabled = enabled;
    }

    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Queues a maximum-table-size change. The change is signaled to the peer
    /// at the start of the next encoded block; a reduce-then-raise between
    /// blocks emits the minimum first so the peer observes both.
    pub fn update_max_size(&mut self, val: usize) {
        match self.size_update {
            Some(SizeUpdate::One(old)) => {
                if val > old {
                    if old > self.table.capacity() {
                        self.size_update = Some(SizeUpdate::One(val));
                    } else {
                        self.size_update = Some(SizeUpdate::Two(old, val));
                    }
                } else {
                    self.size_update = Some(SizeUpdate::One(val));
                }
            }
            Some(SizeUpdate::Two(min, _)) => {
                if val < min {
                    self.size_update = Some(SizeUpdate::One(val));
                } else {
                    self.size_update = Some(SizeUpdate::Two(min, val));
                }
            }
            None => {
                if val != self.table.capacity() {
                    self.size_update = Some(SizeUpdate::One(val));
                }
            }
        }
    }

    /// Encodes a complete header block into `dst`. The caller fragments the
    /// result into HEADERS/CONTINUATION frames.
    pub fn encode<'a, I>(&mut self, headers: I, dst: &mut BytesMut)
    where
        I: IntoIterator<Item = &'a HeaderField>,
    {
        let span = tracing::trace_span!("hpack_encode");
        let _e = span.enter();

        self.encode_size_updates(dst);

        for header in headers {
            self.encode_header(header, dst);
        }
    }

    fn encode_size_updates(&mut self, dst: &mut BytesMut) {
        match self.size_update.take() {
            Some(SizeUpdate::One(val)) => {
                self.table.set_capacity(val);
                encode_size_update(val, dst);
            }
            Some(SizeUpdate::Two(min, max)) => {
                self.table.set_capacity(min);
                self.table.set_capacity(max);
                encode_size_update(min, dst);
                encode_size_update(max, dst);
            }
            None => {}
        }
    }

    fn encode_header(&mut self, header: &HeaderField, dst: &mut BytesMut) {
        if header.is_sensitive() {
            tracing::trace!("encoding sensitive literal");
            self.encode_never_indexed(header, dst);
            return;
        }

        let found = match (find_static(header), self.table.find(header)) {
            (Some((idx, true)), _) => Some((idx, true)),
            (_, Some((idx, matched))) => Some((idx + STATIC_TABLE_LEN, matched)),
            (found, None) => found,
        };

        match found {
            Some((index, true)) => {
                integer::encode_int(index as u64, 7, 0x80, dst);
            }
            Some((index, false)) => {
                integer::encode_int(index as u64, 6, 0x40, dst);
                self.encode_str(header.value(), dst);
                self.table.add(header.clone());
            }
            None => {
                dst.put_u8(0x40);
                self.encode_str(header.name(), dst);
                self.encode_str(header.value(), dst);
                self.table.add(header.clone());
            }
        }
    }

    fn encode_never_indexed(&mut self, header: &HeaderField, dst: &mut BytesMut) {
        let name_index = match (find_static(header), self.table.find(header)) {
            (Some((idx, _)), _) => Some(idx),
            (None, Some((idx, _))) => Some(idx + STATIC_TABLE_LEN),
            (None, None) => None,
        };

        match name_index {
            Some(index) => {
                integer::encode_int(index as u64, 4, 0x10, dst);
            }
            None => {
                dst.put_u8(0x10);
                self.encode_str(header.name(), dst);
            }
        }
        self.encode_str(header.value(), dst);
    }

    fn encode_str(&self, val: &[u8], dst: &mut BytesMut) {
        if self.huffman_enabled && huffman::encoded_len(val) < val.len() {
            integer::encode_int(huffman::encoded_len(val) as u64, 7, 0x80, dst);
            huffman::encode(val, dst);
        } else {
            integer::encode_int(val.len() as u64, 7, 0, dst);
            dst.put_slice(val);
        }
    }
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder::new(4096)
    }
}

fn encode_size_update(val: usize, dst: &mut BytesMut) {
    tracing::trace!(val, "encoding table size update");
    integer::encode_int(val as u64, 5, 0x20, dst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::Decoder;
    use bytes::Bytes;
    use std::io::Cursor;

    fn field(name: &str, value: &str) -> HeaderField {
        HeaderField::new(
            Bytes::copy_from_slice(name.as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        )
    }

    fn decode_all(decoder: &mut Decoder, block: &[u8]) -> Vec<HeaderField> {
        let mut buf = BytesMut::from(block);
        let mut cursor = Cursor::new(&mut buf);
        let mut fields = Vec::new();
        decoder
            .decode(&mut cursor, |f| fields.push(f))
            .expect("decode");
        fields
    }

    #[test]
    fn exact_static_match_is_indexed() {
        let mut encoder = Encoder::new(4096);
        let mut dst = BytesMut::new();
        encoder.encode([&field(":method", "GET")], &mut dst);
        assert_eq!(&dst[..], &[0x82]);
        assert_eq!(encoder.table_size(), 0);
    }

    #[test]
    fn name_match_indexes_incrementally() {
        let mut encoder = Encoder::new(4096);
        encoder.set_huffman_enabled(false);
        let mut dst = BytesMut::new();
        encoder.encode([&field(":authority", "www.example.com")], &mut dst);

        // 0x41 = literal with incremental indexing, name index 1.
        assert_eq!(dst[0], 0x41);
        assert_eq!(encoder.table_size(), 57);

        // Second occurrence hits the dynamic table exactly: index 62.
        let mut dst = BytesMut::new();
        encoder.encode([&field(":authority", "www.example.com")], &mut dst);
        assert_eq!(&dst[..], &[0x80 | 62]);
    }

    #[test]
    fn unknown_pair_emits_literal_name_and_inserts() {
        let mut encoder = Encoder::new(4096);
        encoder.set_huffman_enabled(false);
        let mut dst = BytesMut::new();
        encoder.encode([&field("custom-key", "custom-header")], &mut dst);

        let expected = {
            let mut v = vec![0x40, 0x0a];
            v.extend_from_slice(b"custom-key");
            v.push(0x0d);
            v.extend_from_slice(b"custom-header");
            v
        };
        assert_eq!(&dst[..], &expected[..]);
        assert_eq!(encoder.table_size(), 55);
    }

    #[test]
    fn sensitive_never_indexed_and_never_inserted() {
        let mut encoder = Encoder::new(4096);
        encoder.set_huffman_enabled(false);
        let mut dst = BytesMut::new();

        let secret = HeaderField::sensitive(&b"authorization"[..], &b"Basic aGk="[..]);
        encoder.encode([&secret], &mut dst);

        // 0x1f 0x08: never-indexed, name index 23 (authorization).
        assert_eq!(dst[0], 0x1f);
        assert_eq!(dst[1], 23 - 15);
        assert_eq!(encoder.table_size(), 0);

        let mut decoder = Decoder::new(4096);
        let fields = decode_all(&mut decoder, &dst);
        assert!(fields[0].is_sensitive());
        assert_eq!(fields[0].value(), &b"Basic aGk="[..]);
        assert_eq!(decoder.table_len(), 0);
    }

    #[test]
    fn huffman_used_only_when_shorter() {
        let mut encoder = Encoder::new(4096);
        let mut dst = BytesMut::new();
        encoder.encode([&field(":authority", "www.example.com")], &mut dst);

        // C.4.1: the authority value huffman-encodes to 12 octets.
        assert_eq!(
            &dst[..],
            &[
                0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff
            ]
        );
    }

    #[test]
    fn size_update_emitted_at_next_block_start() {
        let mut encoder = Encoder::new(4096);
        encoder.update_max_size(0);
        encoder.update_max_size(4096);

        let mut dst = BytesMut::new();
        encoder.encode([&field(":method", "GET")], &mut dst);

        // 0x20 (update to 0), then update to 4096, then the indexed field.
        assert_eq!(dst[0], 0x20);
        assert_eq!(&dst[1..4], &[0x3f, 0xe1, 0x1f]);
        assert_eq!(dst[4], 0x82);

        let mut decoder = Decoder::new(4096);
        let fields = decode_all(&mut decoder, &dst);
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn raise_only_emits_single_update() {
        let mut encoder = Encoder::new(4096);
        encoder.update_max_size(8192);

        let mut dst = BytesMut::new();
        encoder.encode([&field(":method", "GET")], &mut dst);
        assert_eq!(&dst[..3], &[0x3f, 0xe1, 0x3f]);
    }

    #[test]
    fn no_update_when_size_unchanged() {
        let mut encoder = Encoder::new(4096);
        encoder.update_max_size(4096);

        let mut dst = BytesMut::new();
        encoder.encode([&field(":method", "GET")], &mut dst);
        assert_eq!(&dst[..], &[0x82]);
    }

    #[test]
    fn round_trip_through_decoder() {
        let mut encoder = Encoder::new(4096);
        let mut decoder = Decoder::new(4096);

        let headers = vec![
            field(":method", "POST"),
            field(":scheme", "https"),
            field(":path", "/submit"),
            field("content-type", "application/json"),
            field("x-request-id", "00f00d"),
        ];

        for _ in 0..3 {
            let mut dst = BytesMut::new();
            encoder.encode(headers.iter(), &mut dst);
            let fields = decode_all(&mut decoder, &dst);
            assert_eq!(fields, headers);
            assert_eq!(decoder.table_size(), encoder.table_size());
        }
    }
}
