//! The request exchanges from RFC 7541 Appendix C, end to end through the
//! public encoder and decoder.

use bytes::BytesMut;
use std::io::Cursor;
use zephyros::hpack::{Decoder, Encoder, HeaderField, HeaderList};

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

fn field(name: &str, value: &str) -> HeaderField {
    HeaderField::new(name.as_bytes().to_vec(), value.as_bytes().to_vec())
}

fn encode(encoder: &mut Encoder, headers: &HeaderList) -> Vec<u8> {
    let mut dst = BytesMut::new();
    encoder.encode(headers.iter(), &mut dst);
    dst.to_vec()
}

fn decode(decoder: &mut Decoder, block: &[u8]) -> HeaderList {
    let mut buf = BytesMut::from(block);
    let mut cursor = Cursor::new(&mut buf);
    let mut fields = HeaderList::new();
    decoder
        .decode(&mut cursor, |f| fields.push(f))
        .expect("valid block");
    fields
}

fn first_request() -> HeaderList {
    [
        field(":method", "GET"),
        field(":scheme", "http"),
        field(":path", "/"),
        field(":authority", "www.example.com"),
    ]
    .into_iter()
    .collect()
}

fn second_request() -> HeaderList {
    [
        field(":method", "GET"),
        field(":scheme", "http"),
        field(":path", "/"),
        field(":authority", "www.example.com"),
        field("cache-control", "no-cache"),
    ]
    .into_iter()
    .collect()
}

fn third_request() -> HeaderList {
    [
        field(":method", "GET"),
        field(":scheme", "https"),
        field(":path", "/index.html"),
        field(":authority", "www.example.com"),
        field("custom-key", "custom-value"),
    ]
    .into_iter()
    .collect()
}

#[test]
fn c3_request_series_without_huffman() {
    let mut encoder = Encoder::new(4096);
    encoder.set_huffman_enabled(false);
    let mut decoder = Decoder::new(4096);

    // C.3.1
    let block = encode(&mut encoder, &first_request());
    assert_eq!(block, hex("828684410f7777772e6578616d706c652e636f6d"));
    assert_eq!(decode(&mut decoder, &block), first_request());
    assert_eq!(decoder.table_len(), 1);
    assert_eq!(decoder.table_size(), 57);

    // C.3.2
    let block = encode(&mut encoder, &second_request());
    assert_eq!(block, hex("828684be58086e6f2d6361636865"));
    assert_eq!(decode(&mut decoder, &block), second_request());
    assert_eq!(decoder.table_len(), 2);
    assert_eq!(decoder.table_size(), 110);

    // C.3.3
    let block = encode(&mut encoder, &third_request());
    assert_eq!(
        block,
        hex("828785bf400a637573746f6d2d6b65790c637573746f6d2d76616c7565")
    );
    assert_eq!(decode(&mut decoder, &block), third_request());
    assert_eq!(decoder.table_len(), 3);
    assert_eq!(decoder.table_size(), 164);
}

#[test]
fn c4_request_series_with_huffman() {
    let mut encoder = Encoder::new(4096);
    let mut decoder = Decoder::new(4096);

    // C.4.1
    let block = encode(&mut encoder, &first_request());
    assert_eq!(block, hex("828684418cf1e3c2e5f23a6ba0ab90f4ff"));
    assert_eq!(decode(&mut decoder, &block), first_request());
    assert_eq!(decoder.table_size(), 57);

    // C.4.2
    let block = encode(&mut encoder, &second_request());
    assert_eq!(block, hex("828684be5886a8eb10649cbf"));
    assert_eq!(decode(&mut decoder, &block), second_request());
    assert_eq!(decoder.table_size(), 110);

    // C.4.3
    let block = encode(&mut encoder, &third_request());
    assert_eq!(
        block,
        hex("828785bf408825a849e95ba97d7f8925a849e95bb8e8b4bf")
    );
    assert_eq!(decode(&mut decoder, &block), third_request());
    assert_eq!(decoder.table_size(), 164);
}

#[test]
fn encoder_and_decoder_tables_stay_in_lockstep() {
    let mut encoder = Encoder::new(256);
    let mut decoder = Decoder::new(256);

    // Enough distinct headers to force evictions at 256 octets.
    for round in 0..10 {
        let headers: HeaderList = (0..4)
            .map(|i| field(&format!("x-header-{round}-{i}"), &format!("value-{round}-{i}")))
            .collect();

        let block = encode(&mut encoder, &headers);
        let decoded = decode(&mut decoder, &block);

        assert_eq!(decoded, headers);
        assert_eq!(decoder.table_size(), encoder.table_size());
        assert!(decoder.table_size() <= 256);
    }
}

#[test]
fn sensitive_fields_round_trip_without_indexing() {
    let mut encoder = Encoder::new(4096);
    let mut decoder = Decoder::new(4096);

    let headers: HeaderList = [
        field(":method", "POST"),
        HeaderField::sensitive(&b"authorization"[..], &b"Bearer s3cr3t"[..]),
        HeaderField::sensitive(&b"x-api-key"[..], &b"0123456789abcdef"[..]),
    ]
    .into_iter()
    .collect();

    for _ in 0..2 {
        let block = encode(&mut encoder, &headers);
        let decoded = decode(&mut decoder, &block);

        assert_eq!(decoded.len(), 3);
        assert!(decoded.iter().skip(1).all(HeaderField::is_sensitive));
        // Sensitive fields never enter either dynamic table.
        assert_eq!(encoder.table_size(), 0);
        assert_eq!(decoder.table_size(), 0);
    }
}

#[test]
fn table_size_bounce_emits_two_updates() {
    let mut encoder = Encoder::new(4096);
    let mut decoder = Decoder::new(4096);

    // Warm the tables.
    let headers = first_request();
    decode(&mut decoder, &encode(&mut encoder, &headers));
    assert_eq!(decoder.table_size(), 57);

    // 4096 -> 0 -> 4096 between blocks: the peer must observe the clear.
    encoder.update_max_size(0);
    encoder.update_max_size(4096);

    let block = encode(&mut encoder, &headers);
    assert_eq!(&block[..4], &hex("203fe11f")[..]);

    let decoded = decode(&mut decoder, &block);
    assert_eq!(decoded, headers);

    // The bounce emptied the table; the re-inserted entry is all that's left.
    assert_eq!(decoder.table_len(), 1);
    assert_eq!(decoder.table_size(), 57);
}
