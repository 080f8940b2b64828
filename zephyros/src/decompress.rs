use bytes::Bytes;
use flate2::write::{GzDecoder, ZlibDecoder};
use std::collections::HashMap;
use std::io::Write;

use crate::error::Http2Error;
use crate::frame::{Reason, StreamDependency, StreamId};
use crate::hpack::HeaderList;
use crate::listener::FrameListener;

/// Inflates `content-encoding`-compressed DATA while keeping flow control
/// accounted in wire (compressed) octets.
///
/// Layered as a [`FrameListener`] decorator: header blocks announcing a
/// supported coding install a per-stream inflater (lazily armed, built on the
/// first DATA frame), DATA is presented to the inner listener decoded, and
/// the inner listener's consumption of decoded octets is translated back to
/// wire octets by ratio before it reaches the codec's flow controller.
#[derive(Debug)]
pub struct DecompressingListener<L> {
    inner: L,
    streams: HashMap<StreamId, StreamInflater>,
    /// The first accounting or decoding failure, latched for the embedder.
    error: Option<Http2Error>,
}

/// Supported content codings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coding {
    Gzip,
    Deflate,
}

/// One stream's inflater and its wire/decoded accounting.
#[derive(Debug)]
pub struct StreamInflater {
    coding: Coding,
    inflater: Option<Inflater>,

    /// Wire octets fed in but not yet consumed against flow control.
    compressed: u64,
    /// Decoded octets delivered but not yet consumed by the application.
    decompressed: u64,
}

enum Inflater {
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Inflater::Gzip(_) => fmt.write_str("Inflater::Gzip"),
            Inflater::Zlib(_) => fmt.write_str("Inflater::Zlib"),
        }
    }
}

impl Coding {
    fn from_header(value: &[u8]) -> Option<Coding> {
        match value {
            b"gzip" | b"x-gzip" => Some(Coding::Gzip),
            b"deflate" | b"x-deflate" => Some(Coding::Deflate),
            _ => None,
        }
    }
}

impl StreamInflater {
    /// Builds an inflater for a `content-encoding` value, or `None` for
    /// codings that pass through untouched.
    pub fn for_encoding(value: &[u8]) -> Option<StreamInflater> {
        Coding::from_header(value).map(StreamInflater::new)
    }

    fn new(coding: Coding) -> StreamInflater {
        StreamInflater {
            coding,
            inflater: None,
            compressed: 0,
            decompressed: 0,
        }
    }

    /// Feeds one DATA payload through the inflater, returning decoded bytes.
    pub fn feed(&mut self, id: StreamId, data: &[u8]) -> Result<Bytes, Http2Error> {
        let inflater = self.inflater.get_or_insert_with(|| match self.coding {
            Coding::Gzip => Inflater::Gzip(GzDecoder::new(Vec::new())),
            Coding::Deflate => Inflater::Zlib(ZlibDecoder::new(Vec::new())),
        });

        let result = match inflater {
            Inflater::Gzip(dec) => dec.write_all(data).and_then(|_| dec.flush()),
            Inflater::Zlib(dec) => dec.write_all(data).and_then(|_| dec.flush()),
        };

        if let Err(e) = result {
            tracing::debug!("decompression failure; stream={:?} err={}", id, e);
            return Err(Http2Error::stream(
                id,
                Reason::INTERNAL_ERROR,
                "content decompression failed",
            ));
        }

        let decoded = match inflater {
            Inflater::Gzip(dec) => std::mem::take(dec.get_mut()),
            Inflater::Zlib(dec) => std::mem::take(dec.get_mut()),
        };

        self.compressed += data.len() as u64;
        self.decompressed += decoded.len() as u64;

        Ok(Bytes::from(decoded))
    }

    /// Translates `k` consumed decoded octets into the wire octets to hand to
    /// the flow controller: `ceil(compressed × k ⁄ decompressed)`, with both
    /// running totals decremented.
    pub fn consume_decoded(&mut self, id: StreamId, k: u64) -> Result<u64, Http2Error> {
        if k == 0 {
            return Ok(0);
        }

        if self.decompressed == 0 || k > self.decompressed {
            return Err(Http2Error::stream(
                id,
                Reason::INTERNAL_ERROR,
                "consumed more than was decompressed",
            ));
        }

        let wire = (self.compressed * k).div_ceil(self.decompressed);

        if wire > self.compressed {
            return Err(Http2Error::stream(
                id,
                Reason::INTERNAL_ERROR,
                "compressed accounting went negative",
            ));
        }

        self.compressed -= wire;
        self.decompressed -= k;

        tracing::trace!(
            "consume_decoded; stream={:?} decoded={} wire={}",
            id,
            k,
            wire
        );
        Ok(wire)
    }
}

impl<L: FrameListener> DecompressingListener<L> {
    pub fn new(inner: L) -> DecompressingListener<L> {
        DecompressingListener {
            inner,
            streams: HashMap::new(),
            error: None,
        }
    }

    pub fn get_ref(&self) -> &L {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut L {
        &mut self.inner
    }

    /// The first failure encountered while inflating, if any. The embedder
    /// should reset the stream it names.
    pub fn take_error(&mut self) -> Option<Http2Error> {
        self.error.take()
    }

    fn install(&mut self, id: StreamId, headers: &mut HeaderList) {
        let inflater = headers
            .get(b"content-encoding")
            .and_then(|value| StreamInflater::for_encoding(value));

        if let Some(inflater) = inflater {
            tracing::debug!("installing {:?} inflater; stream={:?}", inflater.coding, id);
            // The decoded length no longer matches the announced one.
            headers.remove(b"content-length");
            self.streams.insert(id, inflater);
        }
    }

    fn drop_stream(&mut self, id: StreamId) {
        self.streams.remove(&id);
    }
}

impl<L: FrameListener> FrameListener for DecompressingListener<L> {
    fn on_headers_read(
        &mut self,
        stream_id: StreamId,
        mut headers: HeaderList,
        priority: Option<StreamDependency>,
        padding: u32,
        end_of_stream: bool,
    ) {
        if !self.streams.contains_key(&stream_id) {
            self.install(stream_id, &mut headers);
        }
        if end_of_stream {
            self.drop_stream(stream_id);
        }
        self.inner
            .on_headers_read(stream_id, headers, priority, padding, end_of_stream);
    }

    fn on_data_read(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        padding: u32,
        end_of_stream: bool,
    ) -> u32 {
        let wire_len = data.len() as u64;

        let inflater = match self.streams.get_mut(&stream_id) {
            Some(inflater) => inflater,
            None => return self.inner.on_data_read(stream_id, data, padding, end_of_stream),
        };

        let decoded = match inflater.feed(stream_id, &data) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.error.get_or_insert(err);
                self.drop_stream(stream_id);
                // Consume the wire bytes so the peer is not starved while the
                // embedder handles the failure.
                return wire_len as u32 + padding;
            }
        };

        let consumed_decoded = self
            .inner
            .on_data_read(stream_id, decoded.clone(), padding, end_of_stream)
            .saturating_sub(padding);
        let consumed_decoded = (consumed_decoded as u64).min(decoded.len() as u64);

        let wire = match inflater_consume(inflater, stream_id, consumed_decoded) {
            Ok(wire) => wire,
            Err(err) => {
                self.error.get_or_insert(err);
                self.drop_stream(stream_id);
                return wire_len as u32 + padding;
            }
        };

        if end_of_stream {
            self.drop_stream(stream_id);
        }

        wire as u32 + padding
    }

    fn on_rst_stream_read(&mut self, stream_id: StreamId, error_code: Reason) {
        self.drop_stream(stream_id);
        self.inner.on_rst_stream_read(stream_id, error_code);
    }

    fn on_settings_read(&mut self, settings: &crate::frame::Settings) {
        self.inner.on_settings_read(settings);
    }

    fn on_settings_ack_read(&mut self) {
        self.inner.on_settings_ack_read();
    }

    fn on_ping_read(&mut self, payload: &crate::frame::PingPayload) {
        self.inner.on_ping_read(payload);
    }

    fn on_ping_ack_read(&mut self, payload: &crate::frame::PingPayload) {
        self.inner.on_ping_ack_read(payload);
    }

    fn on_push_promise_read(
        &mut self,
        stream_id: StreamId,
        promised_stream_id: StreamId,
        headers: HeaderList,
        padding: u32,
    ) {
        self.inner
            .on_push_promise_read(stream_id, promised_stream_id, headers, padding);
    }

    fn on_go_away_read(&mut self, last_stream_id: StreamId, error_code: Reason, debug_data: Bytes) {
        self.inner
            .on_go_away_read(last_stream_id, error_code, debug_data);
    }

    fn on_window_update_read(&mut self, stream_id: StreamId, delta: u32) {
        self.inner.on_window_update_read(stream_id, delta);
    }

    fn on_unknown_frame(&mut self, kind: u8, stream_id: StreamId, flags: u8, payload: Bytes) {
        self.inner.on_unknown_frame(kind, stream_id, flags, payload);
    }
}

fn inflater_consume(
    inflater: &mut StreamInflater,
    id: StreamId,
    consumed_decoded: u64,
) -> Result<u64, Http2Error> {
    inflater.consume_decoded(id, consumed_decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::HeaderField;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[derive(Default)]
    struct Capture {
        data: Vec<u8>,
        headers: Option<HeaderList>,
        /// What fraction of delivered bytes to report consumed, in percent.
        consume_percent: u32,
    }

    impl FrameListener for Capture {
        fn on_headers_read(
            &mut self,
            _stream_id: StreamId,
            headers: HeaderList,
            _priority: Option<StreamDependency>,
            _padding: u32,
            _end_of_stream: bool,
        ) {
            self.headers = Some(headers);
        }

        fn on_data_read(
            &mut self,
            _stream_id: StreamId,
            data: Bytes,
            padding: u32,
            _end_of_stream: bool,
        ) -> u32 {
            self.data.extend_from_slice(&data);
            data.len() as u32 * self.consume_percent / 100 + padding
        }
    }

    fn gzip_headers() -> HeaderList {
        let mut headers = HeaderList::new();
        headers.push(HeaderField::new(&b":status"[..], &b"200"[..]));
        headers.push(HeaderField::new(&b"content-encoding"[..], &b"gzip"[..]));
        headers.push(HeaderField::new(&b"content-length"[..], &b"512"[..]));
        headers
    }

    #[test]
    fn installs_and_strips_content_length() {
        let mut listener = DecompressingListener::new(Capture {
            consume_percent: 100,
            ..Capture::default()
        });

        listener.on_headers_read(StreamId::from(1), gzip_headers(), None, 0, false);

        let seen = listener.get_ref().headers.as_ref().unwrap();
        assert!(seen.get(b"content-length").is_none());
        assert_eq!(seen.get(b"content-encoding").unwrap(), "gzip");
    }

    #[test]
    fn decodes_and_reports_wire_consumption() {
        let mut listener = DecompressingListener::new(Capture {
            consume_percent: 100,
            ..Capture::default()
        });

        let body = b"hello hello hello hello hello hello hello hello".repeat(8);
        let wire = gzip(&body);

        listener.on_headers_read(StreamId::from(1), gzip_headers(), None, 0, false);
        let consumed =
            listener.on_data_read(StreamId::from(1), Bytes::from(wire.clone()), 0, true);

        // Full consumption of the decoded stream returns all wire bytes.
        assert_eq!(consumed as usize, wire.len());
        assert_eq!(listener.get_ref().data, body);
        assert!(listener.take_error().is_none());
    }

    #[test]
    fn partial_consumption_scales_by_ratio() {
        let mut listener = DecompressingListener::new(Capture {
            consume_percent: 50,
            ..Capture::default()
        });

        let body = vec![b'a'; 4096];
        let wire = gzip(&body);

        listener.on_headers_read(StreamId::from(1), gzip_headers(), None, 0, false);
        let consumed = listener.on_data_read(StreamId::from(1), Bytes::from(wire.clone()), 0, false);

        // Half the decoded bytes consumed: about half the wire bytes, rounded
        // up, and never more than arrived.
        assert!(consumed > 0);
        assert!((consumed as usize) <= wire.len());
        assert!((consumed as usize) >= wire.len() / 2);
    }

    #[test]
    fn passthrough_without_content_encoding() {
        let mut listener = DecompressingListener::new(Capture {
            consume_percent: 100,
            ..Capture::default()
        });

        let mut headers = HeaderList::new();
        headers.push(HeaderField::new(&b":status"[..], &b"200"[..]));
        headers.push(HeaderField::new(&b"content-length"[..], &b"3"[..]));
        listener.on_headers_read(StreamId::from(1), headers, None, 0, false);

        // Identity payloads flow through untouched, content-length intact.
        let seen = listener.get_ref().headers.as_ref().unwrap();
        assert_eq!(seen.get(b"content-length").unwrap(), "3");

        let consumed =
            listener.on_data_read(StreamId::from(1), Bytes::from_static(b"abc"), 2, true);
        assert_eq!(consumed, 5);
        assert_eq!(listener.get_ref().data, b"abc");
    }

    #[test]
    fn garbage_input_latches_stream_error() {
        let mut listener = DecompressingListener::new(Capture {
            consume_percent: 100,
            ..Capture::default()
        });

        listener.on_headers_read(StreamId::from(1), gzip_headers(), None, 0, false);
        let consumed = listener.on_data_read(
            StreamId::from(1),
            Bytes::from_static(b"this is not gzip at all"),
            0,
            false,
        );

        // Wire bytes are still consumed so flow control is not starved.
        assert_eq!(consumed, 23);

        let err = listener.take_error().unwrap();
        assert_eq!(err.stream_id(), Some(StreamId::from(1)));
        assert_eq!(err.reason(), Reason::INTERNAL_ERROR);
    }

    #[test]
    fn accounting_rejects_over_consumption() {
        let mut inflater = StreamInflater::new(Coding::Gzip);
        let wire = gzip(b"some body text some body text");
        let decoded = inflater.feed(StreamId::from(1), &wire).unwrap();

        assert!(inflater
            .consume_decoded(StreamId::from(1), decoded.len() as u64 + 1)
            .is_err());

        // Fresh inflater: no decoded bytes at all.
        let mut empty = StreamInflater::new(Coding::Gzip);
        assert!(empty.consume_decoded(StreamId::from(1), 1).is_err());
        assert_eq!(empty.consume_decoded(StreamId::from(1), 0).unwrap(), 0);
    }

    #[test]
    fn deflate_uses_zlib_wrapping() {
        use flate2::write::ZlibEncoder;

        let mut listener = DecompressingListener::new(Capture {
            consume_percent: 100,
            ..Capture::default()
        });

        let mut headers = HeaderList::new();
        headers.push(HeaderField::new(&b":status"[..], &b"200"[..]));
        headers.push(HeaderField::new(&b"content-encoding"[..], &b"deflate"[..]));
        listener.on_headers_read(StreamId::from(1), headers, None, 0, false);

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"deflated body").unwrap();
        let wire = enc.finish().unwrap();

        listener.on_data_read(StreamId::from(1), Bytes::from(wire), 0, true);
        assert_eq!(listener.get_ref().data, b"deflated body");
        assert!(listener.take_error().is_none());
    }
}
