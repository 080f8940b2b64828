use bytes::Bytes;

use crate::frame::{PingPayload, Reason, Settings, StreamDependency, StreamId};
use crate::hpack::HeaderList;

/// The callback surface the codec drives as frames arrive.
///
/// Every method has a no-op default, so implementations override only the
/// events they care about. For layering (wrapping another listener), see
/// [`ListenerDecorator`].
pub trait FrameListener {
    /// A complete header block arrived. `padding` is the number of padding
    /// octets (including the pad-length octet) carried by the HEADERS frame.
    fn on_headers_read(
        &mut self,
        stream_id: StreamId,
        headers: HeaderList,
        priority: Option<StreamDependency>,
        padding: u32,
        end_of_stream: bool,
    ) {
        let _ = (stream_id, headers, priority, padding, end_of_stream);
    }

    /// DATA arrived. The return value is the number of octets the application
    /// has consumed immediately, out of `data.len() + padding`; return less to
    /// defer and call `consume_bytes` later.
    fn on_data_read(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        padding: u32,
        end_of_stream: bool,
    ) -> u32 {
        let _ = (stream_id, end_of_stream);
        data.len() as u32 + padding
    }

    fn on_rst_stream_read(&mut self, stream_id: StreamId, error_code: Reason) {
        let _ = (stream_id, error_code);
    }

    fn on_settings_read(&mut self, settings: &Settings) {
        let _ = settings;
    }

    fn on_settings_ack_read(&mut self) {}

    fn on_ping_read(&mut self, payload: &PingPayload) {
        let _ = payload;
    }

    fn on_ping_ack_read(&mut self, payload: &PingPayload) {
        let _ = payload;
    }

    fn on_push_promise_read(
        &mut self,
        stream_id: StreamId,
        promised_stream_id: StreamId,
        headers: HeaderList,
        padding: u32,
    ) {
        let _ = (stream_id, promised_stream_id, headers, padding);
    }

    fn on_go_away_read(&mut self, last_stream_id: StreamId, error_code: Reason, debug_data: Bytes) {
        let _ = (last_stream_id, error_code, debug_data);
    }

    fn on_window_update_read(&mut self, stream_id: StreamId, delta: u32) {
        let _ = (stream_id, delta);
    }

    /// A frame of unknown type. Ignored by the codec beyond this callback.
    fn on_unknown_frame(&mut self, kind: u8, stream_id: StreamId, flags: u8, payload: Bytes) {
        let _ = (kind, stream_id, flags, payload);
    }
}

/// A listener that does nothing; useful as the innermost layer of a decorator
/// stack or in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopListener;

impl FrameListener for NopListener {}

/// Forwards every callback to the wrapped listener. Layers override what they
/// need and delegate the rest:
///
/// ```ignore
/// struct Counting<L> { inner: ListenerDecorator<L>, frames: usize }
/// ```
#[derive(Debug)]
pub struct ListenerDecorator<L> {
    inner: L,
}

impl<L: FrameListener> ListenerDecorator<L> {
    pub fn new(inner: L) -> ListenerDecorator<L> {
        ListenerDecorator { inner }
    }

    pub fn get_ref(&self) -> &L {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut L {
        &mut self.inner
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

impl<L: FrameListener> FrameListener for ListenerDecorator<L> {
    fn on_headers_read(
        &mut self,
        stream_id: StreamId,
        headers: HeaderList,
        priority: Option<StreamDependency>,
        padding: u32,
        end_of_stream: bool,
    ) {
        self.inner
            .on_headers_read(stream_id, headers, priority, padding, end_of_stream)
    }

    fn on_data_read(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        padding: u32,
        end_of_stream: bool,
    ) -> u32 {
        self.inner.on_data_read(stream_id, data, padding, end_of_stream)
    }

    fn on_rst_stream_read(&mut self, stream_id: StreamId, error_code: Reason) {
        self.inner.on_rst_stream_read(stream_id, error_code)
    }

    fn on_settings_read(&mut self, settings: &Settings) {
        self.inner.on_settings_read(settings)
    }

    fn on_settings_ack_read(&mut self) {
        self.inner.on_settings_ack_read()
    }

    fn on_ping_read(&mut self, payload: &PingPayload) {
        self.inner.on_ping_read(payload)
    }

    fn on_ping_ack_read(&mut self, payload: &PingPayload) {
        self.inner.on_ping_ack_read(payload)
    }

    fn on_push_promise_read(
        &mut self,
        stream_id: StreamId,
        promised_stream_id: StreamId,
        headers: HeaderList,
        padding: u32,
    ) {
        self.inner
            .on_push_promise_read(stream_id, promised_stream_id, headers, padding)
    }

    fn on_go_away_read(&mut self, last_stream_id: StreamId, error_code: Reason, debug_data: Bytes) {
        self.inner
            .on_go_away_read(last_stream_id, error_code, debug_data)
    }

    fn on_window_update_read(&mut self, stream_id: StreamId, delta: u32) {
        self.inner.on_window_update_read(stream_id, delta)
    }

    fn on_unknown_frame(&mut self, kind: u8, stream_id: StreamId, flags: u8, payload: Bytes) {
        self.inner.on_unknown_frame(kind, stream_id, flags, payload)
    }
}
