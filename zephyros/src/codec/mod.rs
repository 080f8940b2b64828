mod framed_read;
mod framed_write;

pub use framed_read::FrameReader;
pub use framed_write::{FrameWriter, PREFACE};

use bytes::Bytes;

use crate::error::{Http2Error, SendError, UserError};
use crate::frame::{
    self, Frame, PingPayload, Reason, Settings, StreamId, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_SETTINGS_HEADER_TABLE_SIZE,
};
use crate::hpack::HeaderList;
use crate::listener::FrameListener;
use crate::proto::connection::ConnectionState;
use crate::proto::streams::{PropertyKey, Role, StateError};
use crate::proto::StreamState;

/// Configuration for one endpoint of a connection.
#[derive(Debug, Clone)]
pub struct Http2Config {
    role: Role,
    header_table_size: usize,
    initial_window_size: u32,
    max_frame_size: u32,
    max_header_list_size: usize,
    enable_push: bool,
    max_concurrent_streams: Option<u32>,
    huffman_enabled: bool,
    window_update_ratio: f64,
}

impl Http2Config {
    pub fn client() -> Http2Config {
        // Clients do not accept pushes unless asked to.
        Http2Config::base(Role::Client)
    }

    pub fn server() -> Http2Config {
        let mut config = Http2Config::base(Role::Server);
        config.enable_push = true;
        config
    }

    fn base(role: Role) -> Http2Config {
        Http2Config {
            role,
            header_table_size: DEFAULT_SETTINGS_HEADER_TABLE_SIZE,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: usize::MAX,
            enable_push: false,
            max_concurrent_streams: None,
            huffman_enabled: true,
            window_update_ratio: 0.5,
        }
    }

    pub fn header_table_size(mut self, size: usize) -> Self {
        self.header_table_size = size;
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        assert!(size as usize <= frame::MAX_INITIAL_WINDOW_SIZE);
        self.initial_window_size = size;
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        assert!((frame::DEFAULT_MAX_FRAME_SIZE..=frame::MAX_MAX_FRAME_SIZE).contains(&size));
        self.max_frame_size = size;
        self
    }

    pub fn max_header_list_size(mut self, size: usize) -> Self {
        self.max_header_list_size = size;
        self
    }

    pub fn enable_push(mut self, enabled: bool) -> Self {
        self.enable_push = enabled;
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = Some(max);
        self
    }

    pub fn huffman_enabled(mut self, enabled: bool) -> Self {
        self.huffman_enabled = enabled;
        self
    }

    pub fn window_update_ratio(mut self, ratio: f64) -> Self {
        assert!(ratio > 0.0 && ratio <= 1.0);
        self.window_update_ratio = ratio;
        self
    }

    fn initial_settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.set_header_table_size(Some(self.header_table_size as u32));
        if self.role == Role::Client {
            settings.set_enable_push(self.enable_push);
        }
        settings.set_initial_window_size(Some(self.initial_window_size));
        if self.max_frame_size != frame::DEFAULT_MAX_FRAME_SIZE {
            settings.set_max_frame_size(Some(self.max_frame_size));
        }
        if let Some(max) = self.max_concurrent_streams {
            settings.set_max_concurrent_streams(Some(max));
        }
        if self.max_header_list_size != usize::MAX {
            let advertised = self.max_header_list_size.min(u32::MAX as usize) as u32;
            settings.set_max_header_list_size(Some(advertised));
        }
        settings
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preface {
    /// Server side: this many octets of the client magic have matched so far.
    Expecting(usize),
    Done,
}

/// The codec for one HTTP/2 connection.
///
/// Sans-io: the transport pushes inbound bytes through
/// [`recv_bytes`](Connection::recv_bytes), which parses frames, advances
/// connection and stream state, and drives the [`FrameListener`]; everything
/// the codec wants to say accumulates in the write buffer and is drained with
/// [`take_output`](Connection::take_output).
///
/// Constructing the codec already queues the opening bytes: the 24-octet
/// client magic (on the client side) followed by this endpoint's initial
/// SETTINGS.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    reader: FrameReader,
    writer: FrameWriter,
    preface: Preface,

    /// Set once a fatal error tore the connection down.
    closed: Option<Reason>,

    /// Whether we accept PUSH_PROMISE (what we advertise in ENABLE_PUSH).
    local_enable_push: bool,
    /// The local INITIAL_WINDOW_SIZE currently in force (post-ACK), used to
    /// compute deltas when a later change is acknowledged.
    applied_local_initial_window: u32,
}

impl Connection {
    pub fn new(config: Http2Config) -> Connection {
        let role = config.role;

        let mut state = ConnectionState::new(
            role,
            DEFAULT_INITIAL_WINDOW_SIZE as i32,
            DEFAULT_INITIAL_WINDOW_SIZE,
            config.window_update_ratio,
        );
        state.streams.set_max_concurrent(config.max_concurrent_streams);

        let reader = FrameReader::new(
            DEFAULT_SETTINGS_HEADER_TABLE_SIZE,
            config.max_header_list_size,
        );
        let mut writer = FrameWriter::new(DEFAULT_SETTINGS_HEADER_TABLE_SIZE);
        writer.set_huffman_enabled(config.huffman_enabled);

        let mut connection = Connection {
            preface: match role {
                Role::Client => Preface::Done,
                Role::Server => Preface::Expecting(0),
            },
            state,
            reader,
            writer,
            closed: None,
            local_enable_push: config.enable_push,
            applied_local_initial_window: DEFAULT_INITIAL_WINDOW_SIZE,
        };

        if role == Role::Client {
            connection.writer.write_preface();
        }

        let settings = config.initial_settings();
        connection
            .state
            .settings_sent(settings.clone())
            .expect("no settings can be pending yet");
        connection
            .writer
            .buffer(settings.into())
            .expect("settings frame always fits");

        connection
    }

    pub fn role(&self) -> Role {
        self.state.streams.role()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn local_settings(&self) -> &Settings {
        self.state.local_settings()
    }

    pub fn remote_settings(&self) -> &Settings {
        self.state.remote_settings()
    }

    /// Bytes queued for the transport. Empties the write buffer.
    pub fn take_output(&mut self) -> Bytes {
        self.writer.take()
    }

    pub fn has_output(&self) -> bool {
        !self.writer.is_empty()
    }

    /// The id the next locally initiated stream will use.
    pub fn next_stream_id(&self) -> Result<StreamId, UserError> {
        self.state
            .streams
            .peek_next_local_id()
            .ok_or(UserError::OverflowedStreamId)
    }

    pub fn last_remote_stream_id(&self) -> StreamId {
        self.state.streams.last_remote_id()
    }

    pub fn stream_state(&self, id: StreamId) -> Option<StreamState> {
        self.state.streams.get(id).map(|s| s.state().current())
    }

    pub fn active_streams(&self) -> usize {
        self.state.streams.active_count()
    }

    pub fn allocate_property_key(&mut self) -> PropertyKey {
        self.state.streams.allocate_property_key()
    }

    pub fn set_stream_property(
        &mut self,
        id: StreamId,
        key: PropertyKey,
        value: Box<dyn std::any::Any>,
    ) -> Result<(), UserError> {
        let stream = self
            .state
            .streams
            .get_mut(id)
            .ok_or(UserError::InactiveStreamId)?;
        stream.set_property(key, value);
        Ok(())
    }

    pub fn take_stream_property(
        &mut self,
        id: StreamId,
        key: PropertyKey,
    ) -> Option<Box<dyn std::any::Any>> {
        self.state.streams.get_mut(id)?.take_property(key)
    }

    // ===== inbound =====

    /// Feeds transport bytes through the codec.
    ///
    /// Stream-scoped failures are handled internally: an RST_STREAM goes out,
    /// the stream closes, processing continues. A connection-scoped failure
    /// queues GOAWAY, poisons the codec and is returned; the caller should
    /// flush the remaining output and close the transport.
    pub fn recv_bytes<L: FrameListener>(
        &mut self,
        mut bytes: &[u8],
        listener: &mut L,
    ) -> Result<(), Http2Error> {
        if self.closed.is_some() {
            tracing::trace!("dropping {} bytes on closed connection", bytes.len());
            return Ok(());
        }

        if let Preface::Expecting(seen) = self.preface {
            match recv_preface(seen, bytes) {
                Ok((Preface::Expecting(n), _)) => {
                    self.preface = Preface::Expecting(n);
                    return Ok(());
                }
                Ok((Preface::Done, rest)) => {
                    tracing::debug!("client preface received");
                    self.preface = Preface::Done;
                    bytes = rest;
                }
                Err(err) => return self.connection_failure(err),
            }
        }

        self.reader.extend(bytes);

        loop {
            match self.reader.next_frame() {
                Ok(Some(frame)) => {
                    if let Err(err) = self.recv_frame(frame, listener) {
                        if err.is_connection_error() {
                            return self.connection_failure(err);
                        }
                        self.stream_failure(err);
                    }
                }
                Ok(None) => return Ok(()),
                Err(err) => {
                    if err.is_connection_error() {
                        return self.connection_failure(err);
                    }
                    self.stream_failure(err);
                }
            }
        }
    }

    fn recv_frame<L: FrameListener>(
        &mut self,
        frame: Frame,
        listener: &mut L,
    ) -> Result<(), Http2Error> {
        tracing::trace!("recv frame; frame={:?}", frame);

        match frame {
            Frame::Data(frame) => self.recv_data(frame, listener),
            Frame::Headers(frame) => self.recv_headers(frame, listener),
            Frame::Priority(frame) => self.recv_priority(frame),
            Frame::Reset(frame) => self.recv_reset(frame, listener),
            Frame::Settings(frame) => self.recv_settings(frame, listener),
            Frame::PushPromise(frame) => self.recv_push_promise(frame, listener),
            Frame::Ping(frame) => self.recv_ping(frame, listener),
            Frame::GoAway(frame) => self.recv_go_away(frame, listener),
            Frame::WindowUpdate(frame) => self.recv_window_update(frame, listener),
            Frame::Unknown(frame) => {
                listener.on_unknown_frame(frame.kind, frame.stream_id, frame.flags, frame.payload);
                Ok(())
            }
        }
    }

    fn recv_data<L: FrameListener>(
        &mut self,
        frame: frame::Data,
        listener: &mut L,
    ) -> Result<(), Http2Error> {
        let id = frame.stream_id();
        let flow_len = frame.flow_len();

        // The connection window is charged for every arriving DATA frame,
        // even one destined for a dead stream.
        self.state
            .recv_flow
            .recv_data(flow_len)
            .map_err(|reason| Http2Error::connection(reason, "connection window exceeded"))?;

        // After our GOAWAY, frames on streams we refused are dropped quietly,
        // with their octets returned to keep the accounts balanced.
        if !self.state.go_away.allows_new_remote_stream(id)
            && self.state.streams.get(id).is_none()
        {
            tracing::trace!("ignoring DATA past GOAWAY; stream={:?}", id);
            return self.release_connection_bytes(flow_len);
        }

        match self.recv_data_on_stream(&frame) {
            Ok(()) => {}
            Err(err) if err.is_connection_error() => return Err(err),
            Err(err) => {
                // The stream is done for, but the connection-level octets
                // must still be returned to the peer.
                self.release_connection_bytes(flow_len)?;
                return Err(err);
            }
        }

        let padding = flow_len - frame.payload().len() as u32;
        let end_of_stream = frame.is_end_stream();
        let consumed = listener.on_data_read(id, frame.into_payload(), padding, end_of_stream);

        self.state.streams.retire_if_closed(id);

        if consumed > 0 {
            self.consume_bytes(id, consumed.min(flow_len))
                .map_err(|_| Http2Error::stream(id, Reason::INTERNAL_ERROR, "over-consumed"))?;
        }

        Ok(())
    }

    /// The stream-scoped half of DATA receipt: existence, state, and the
    /// stream window.
    fn recv_data_on_stream(&mut self, frame: &frame::Data) -> Result<(), Http2Error> {
        let id = frame.stream_id();
        let flow_len = frame.flow_len();

        let recently_closed = self.state.streams.is_recently_closed(id);
        let remote_idle = self.state.streams.is_idle(id);

        let stream = match self.state.streams.get_mut(id) {
            Some(stream) => stream,
            None if recently_closed => {
                return Err(Http2Error::stream(
                    id,
                    Reason::STREAM_CLOSED,
                    "DATA on closed stream",
                ));
            }
            None if remote_idle => {
                return Err(Http2Error::connection(
                    Reason::PROTOCOL_ERROR,
                    "DATA on idle stream",
                ));
            }
            None => {
                return Err(Http2Error::stream(
                    id,
                    Reason::STREAM_CLOSED,
                    "DATA on retired stream",
                ));
            }
        };

        stream
            .state()
            .ensure_recv_data()
            .map_err(|e| scope(e, id))?;

        stream
            .recv_flow_mut()
            .recv_data(flow_len)
            .map_err(|reason| Http2Error::stream(id, reason, "stream window exceeded"))?;

        if frame.is_end_stream() {
            stream.state_mut().recv_close().map_err(|e| scope(e, id))?;
        }

        Ok(())
    }

    fn recv_headers<L: FrameListener>(
        &mut self,
        frame: frame::Headers,
        listener: &mut L,
    ) -> Result<(), Http2Error> {
        let id = frame.stream_id();

        if !self.state.go_away.allows_new_remote_stream(id)
            && self.state.streams.get(id).is_none()
        {
            tracing::trace!("ignoring HEADERS past GOAWAY; stream={:?}", id);
            return Ok(());
        }

        if let Some(dep) = frame.stream_dep() {
            self.state.streams.priority_mut().reprioritize(id, dep);
        }

        let eos = frame.is_end_stream();
        let stream = self.state.streams.open_remote(id)?;
        stream.state_mut().recv_open(eos).map_err(|e| scope(e, id))?;

        let padding = if frame.is_padded() {
            frame.pad_len() as u32 + 1
        } else {
            0
        };

        let priority = frame.stream_dep();
        listener.on_headers_read(id, frame.into_fields(), priority, padding, eos);

        self.state.streams.retire_if_closed(id);
        Ok(())
    }

    fn recv_priority(&mut self, frame: frame::Priority) -> Result<(), Http2Error> {
        // PRIORITY is valid in any stream state, including idle; it touches
        // only the tree.
        self.state
            .streams
            .priority_mut()
            .reprioritize(frame.stream_id(), frame.dependency());
        Ok(())
    }

    fn recv_reset<L: FrameListener>(
        &mut self,
        frame: frame::Reset,
        listener: &mut L,
    ) -> Result<(), Http2Error> {
        let id = frame.stream_id();

        match self.state.streams.get_mut(id) {
            Some(stream) => {
                stream.state_mut().recv_reset(frame.reason());
                stream.clear_pending_send();
            }
            None => {
                if self.state.streams.is_idle(id) {
                    return Err(Http2Error::connection(
                        Reason::PROTOCOL_ERROR,
                        "RST_STREAM on idle stream",
                    ));
                }
                // Late reset for an already retired stream.
                return Ok(());
            }
        }

        listener.on_rst_stream_read(id, frame.reason());
        self.state.streams.retire_if_closed(id);
        Ok(())
    }

    fn recv_settings<L: FrameListener>(
        &mut self,
        frame: Settings,
        listener: &mut L,
    ) -> Result<(), Http2Error> {
        if frame.is_ack() {
            match self.state.settings_acked() {
                Some(local) => {
                    self.apply_acked_local_settings(&local);
                    listener.on_settings_ack_read();
                }
                None => {
                    tracing::debug!("ignoring unexpected SETTINGS ACK");
                }
            }
            return Ok(());
        }

        // The peer's settings take effect immediately, then the ACK goes out.
        if let Some(size) = frame.header_table_size() {
            self.writer.set_header_table_size(size as usize);
        }

        if let Some(size) = frame.max_frame_size() {
            self.writer.set_max_frame_size(size as usize);
        }

        if let Some(new) = frame.initial_window_size() {
            let old = self
                .state
                .remote_settings()
                .initial_window_size()
                .unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE);
            let delta = new as i64 - old as i64;
            if delta != 0 {
                self.state
                    .streams
                    .apply_remote_initial_delta(delta as i32)?;
            }
        }

        self.state.update_remote_settings(&frame);

        self.writer
            .buffer(Settings::ack().into())
            .expect("ack frame always fits");

        listener.on_settings_read(&frame);

        // Streams parked behind a small window may have recovered.
        self.flush_parked();
        Ok(())
    }

    fn apply_acked_local_settings(&mut self, local: &Settings) {
        if let Some(size) = local.header_table_size() {
            self.reader.set_header_table_size(size as usize);
        }

        if let Some(size) = local.max_frame_size() {
            self.reader.set_max_frame_size(size);
        }

        if let Some(max) = local.max_concurrent_streams() {
            self.state.streams.set_max_concurrent(Some(max));
        }

        if let Some(size) = local.max_header_list_size() {
            self.reader.set_max_header_list_size(size as usize);
        }

        if let Some(new) = local.initial_window_size() {
            let delta = new as i64 - self.applied_local_initial_window as i64;
            if delta != 0 {
                self.state.streams.apply_local_initial_delta(delta as i32);
                self.applied_local_initial_window = new;
            }
        }
    }

    fn recv_push_promise<L: FrameListener>(
        &mut self,
        frame: frame::PushPromise,
        listener: &mut L,
    ) -> Result<(), Http2Error> {
        // Only servers push, and only when the client invited them to.
        if self.role() == Role::Server || !self.local_enable_push {
            return Err(Http2Error::connection(
                Reason::PROTOCOL_ERROR,
                "PUSH_PROMISE received with push disabled",
            ));
        }

        let id = frame.stream_id();
        let promised_id = frame.promised_id();

        if self.state.streams.get(id).is_none() {
            return Err(Http2Error::connection(
                Reason::PROTOCOL_ERROR,
                "PUSH_PROMISE on unknown stream",
            ));
        }

        self.state.streams.reserve_remote(promised_id)?;

        listener.on_push_promise_read(id, promised_id, frame.into_fields(), 0);
        Ok(())
    }

    fn recv_ping<L: FrameListener>(
        &mut self,
        frame: frame::Ping,
        listener: &mut L,
    ) -> Result<(), Http2Error> {
        if frame.is_ack() {
            if !self.state.user_pong_received(frame.payload()) {
                tracing::debug!("PING ACK with unexpected payload");
            }
            listener.on_ping_ack_read(frame.payload());
            return Ok(());
        }

        // Echoed synchronously, before any further inbound frame.
        let pong = frame::Ping::pong(*frame.payload());
        self.writer
            .buffer(pong.into())
            .expect("ping frame always fits");

        listener.on_ping_read(frame.payload());
        Ok(())
    }

    fn recv_go_away<L: FrameListener>(
        &mut self,
        frame: frame::GoAway,
        listener: &mut L,
    ) -> Result<(), Http2Error> {
        self.state.go_away.recv(&frame);
        listener.on_go_away_read(
            frame.last_stream_id(),
            frame.reason(),
            frame.debug_data().clone(),
        );
        Ok(())
    }

    fn recv_window_update<L: FrameListener>(
        &mut self,
        frame: frame::WindowUpdate,
        listener: &mut L,
    ) -> Result<(), Http2Error> {
        let id = frame.stream_id();
        let delta = frame.size_increment();

        if id.is_zero() {
            self.state
                .send_flow
                .inc_window(delta)
                .map_err(|reason| Http2Error::connection(reason, "connection window overflow"))?;
        } else {
            match self.state.streams.get_mut(id) {
                Some(stream) => {
                    stream
                        .send_flow_mut()
                        .inc_window(delta)
                        .map_err(|reason| Http2Error::stream(id, reason, "stream window overflow"))?;
                }
                None => {
                    if self.state.streams.is_idle(id) {
                        return Err(Http2Error::connection(
                            Reason::PROTOCOL_ERROR,
                            "WINDOW_UPDATE on idle stream",
                        ));
                    }
                    // Late update for a retired stream.
                    return Ok(());
                }
            }
        }

        listener.on_window_update_read(id, delta);

        // Window growth may unpark writes.
        self.flush_parked();
        Ok(())
    }

    // ===== outbound =====

    /// Sends a header block on `id`, opening the stream when new. New ids
    /// come from [`next_stream_id`](Connection::next_stream_id).
    pub fn send_headers(
        &mut self,
        id: StreamId,
        headers: HeaderList,
        end_stream: bool,
    ) -> Result<(), SendError> {
        self.ensure_open()?;

        if self.state.streams.get(id).is_none() {
            if !self.state.go_away.allows_new_local_stream(id) {
                return Err(UserError::GoingAway.into());
            }
            self.state.streams.open_local_with_id(id)?;
        }

        let stream = self.state.streams.get_mut(id).expect("just ensured");
        stream
            .state_mut()
            .send_open(end_stream)
            .map_err(|e| SendError::Http2(scope(e, id)))?;

        let mut frame = frame::Headers::new(id, headers);
        if end_stream {
            frame.set_end_stream();
        }

        self.writer.buffer(frame.into())?;
        self.state.streams.retire_if_closed(id);
        Ok(())
    }

    /// Sends DATA on `id`, fragmenting to the peer's MAX_FRAME_SIZE. Chunks
    /// the flow-control windows cannot cover yet are parked and leave once
    /// WINDOW_UPDATE or a settings change raises the windows.
    pub fn send_data(
        &mut self,
        id: StreamId,
        mut data: Bytes,
        end_stream: bool,
    ) -> Result<(), SendError> {
        self.ensure_open()?;

        let stream = self
            .state
            .streams
            .get_mut(id)
            .ok_or(UserError::InactiveStreamId)?;

        stream
            .state()
            .ensure_send_data()
            .map_err(|e| SendError::Http2(scope(e, id)))?;

        let max_frame = self.writer.max_frame_size();

        loop {
            let chunk_len = data.len().min(max_frame);
            let chunk = data.split_to(chunk_len);
            let last = data.is_empty();

            let mut frame = frame::Data::new(id, chunk);
            if end_stream && last {
                frame.set_end_stream(true);
            }

            self.send_or_park(frame)?;

            if last {
                return Ok(());
            }
        }
    }

    fn send_or_park(&mut self, frame: frame::Data) -> Result<(), SendError> {
        let id = frame.stream_id();
        let len = frame.flow_len();

        let connection_available = self.state.send_flow.available();
        let stream = self.state.streams.get_mut(id).expect("stream exists");

        let window_ready = !stream.has_pending_send()
            && len <= stream.send_flow().available()
            && len <= connection_available;

        if !window_ready {
            stream.park_send(frame);
            return Ok(());
        }

        stream.send_flow_mut().send_data(len);
        self.state.send_flow.send_data(len);

        let end_stream = frame.is_end_stream();
        self.writer.buffer(frame.into())?;

        if end_stream {
            let stream = self.state.streams.get_mut(id).expect("stream exists");
            stream
                .state_mut()
                .send_close()
                .map_err(|e| SendError::Http2(scope(e, id)))?;
            self.state.streams.retire_if_closed(id);
        }

        Ok(())
    }

    /// Flushes parked DATA wherever both windows now admit it.
    fn flush_parked(&mut self) {
        for id in self.state.streams.ids_with_pending_send() {
            loop {
                let connection_available = self.state.send_flow.available();
                let frame = match self.state.streams.get_mut(id) {
                    Some(stream) => match stream.pop_sendable(connection_available) {
                        Some(frame) => frame,
                        None => break,
                    },
                    None => break,
                };

                let len = frame.flow_len();
                let end_stream = frame.is_end_stream();

                let stream = self.state.streams.get_mut(id).expect("stream exists");
                stream.send_flow_mut().send_data(len);
                self.state.send_flow.send_data(len);

                tracing::trace!("unparking DATA; stream={:?} len={}", id, len);

                if self.writer.buffer(frame.into()).is_err() {
                    break;
                }

                if end_stream {
                    let stream = self.state.streams.get_mut(id).expect("stream exists");
                    let _ = stream.state_mut().send_close();
                    self.state.streams.retire_if_closed(id);
                    break;
                }
            }
        }
    }

    /// Signals that the application consumed `n` previously delivered octets
    /// on `id`, releasing inbound flow-control credit. WINDOW_UPDATE frames
    /// go out once the configured ratio of a window is pending.
    pub fn consume_bytes(&mut self, id: StreamId, n: u32) -> Result<(), UserError> {
        if n == 0 {
            return Ok(());
        }

        if let Some(stream) = self.state.streams.get_mut(id) {
            let released = stream
                .recv_flow_mut()
                .consume(n)
                .map_err(|_| UserError::ReleaseCapacityTooBig)?;

            if let Some(increment) = released {
                self.writer
                    .buffer(frame::WindowUpdate::new(id, increment).into())
                    .expect("window update always fits");
            }
        }

        self.release_connection_bytes(n)
            .map_err(|_| UserError::ReleaseCapacityTooBig)
    }

    fn release_connection_bytes(&mut self, n: u32) -> Result<(), Http2Error> {
        let released = self.state.recv_flow.consume(n).map_err(|_| {
            Http2Error::connection(Reason::INTERNAL_ERROR, "connection window over-released")
        })?;

        if let Some(increment) = released {
            self.writer
                .buffer(frame::WindowUpdate::new(StreamId::ZERO, increment).into())
                .expect("window update always fits");
        }
        Ok(())
    }

    /// Cancels `id` with RST_STREAM; queued writes for it are dropped.
    pub fn rst_stream(&mut self, id: StreamId, reason: Reason) -> Result<(), SendError> {
        self.ensure_open()?;

        let stream = self
            .state
            .streams
            .get_mut(id)
            .ok_or(UserError::InactiveStreamId)?;

        stream.state_mut().send_reset(reason);
        stream.clear_pending_send();

        self.writer
            .buffer(frame::Reset::new(id, reason).into())?;

        self.state.streams.retire_if_closed(id);
        Ok(())
    }

    /// Reserves a push stream associated with `id` and sends PUSH_PROMISE.
    /// Returns the promised stream id.
    pub fn send_push_promise(
        &mut self,
        id: StreamId,
        headers: HeaderList,
    ) -> Result<StreamId, SendError> {
        self.ensure_open()?;

        if self.role() != Role::Server {
            return Err(UserError::UnexpectedFrameType.into());
        }

        if self.state.remote_settings().is_push_enabled() == Some(false) {
            return Err(UserError::PeerDisabledServerPush.into());
        }

        if self.state.streams.get(id).is_none() {
            return Err(UserError::InactiveStreamId.into());
        }

        let promised_id = self.state.streams.reserve_local()?.id();

        let frame = frame::PushPromise::new(id, promised_id, headers);
        self.writer.buffer(frame.into())?;
        Ok(promised_id)
    }

    /// Sends a user PING; the ACK surfaces through `on_ping_ack_read`.
    pub fn send_ping(&mut self, payload: PingPayload) -> Result<(), SendError> {
        self.ensure_open()?;
        self.state.user_ping_sent(payload)?;
        self.writer
            .buffer(frame::Ping::new(payload).into())
            .expect("ping frame always fits");
        Ok(())
    }

    /// Sends a SETTINGS update; its local effects apply once the peer ACKs.
    pub fn send_settings(&mut self, settings: Settings) -> Result<(), SendError> {
        self.ensure_open()?;
        self.state.settings_sent(settings.clone())?;
        self.writer.buffer(settings.into())?;
        Ok(())
    }

    /// Begins graceful shutdown: GOAWAY with NO_ERROR naming the last remote
    /// stream we will process. In-flight streams run to completion; newer
    /// remote streams are ignored.
    pub fn go_away(&mut self) -> Result<(), SendError> {
        self.ensure_open()?;
        let frame = frame::GoAway::new(self.state.streams.last_remote_id(), Reason::NO_ERROR);
        self.state.go_away.send(&frame, false);
        self.writer.buffer(frame.into())?;
        Ok(())
    }

    /// Tears the connection down with an error code of the caller's choosing.
    pub fn close(&mut self, reason: Reason) {
        if self.closed.is_some() {
            return;
        }
        let _ = self.connection_failure(Http2Error::connection(reason, "closed by application"));
    }

    fn ensure_open(&self) -> Result<(), SendError> {
        match self.closed {
            Some(reason) => Err(SendError::Http2(Http2Error::connection(
                reason,
                "connection closed",
            ))),
            None => Ok(()),
        }
    }

    /// Fatal path: queue GOAWAY, poison the codec, surface the error.
    fn connection_failure(&mut self, err: Http2Error) -> Result<(), Http2Error> {
        debug_assert!(err.is_connection_error());
        tracing::debug!("connection failure; err={}", err);

        let reason = err.reason();
        let frame = frame::GoAway::with_debug_data(
            self.state.streams.last_remote_id(),
            reason,
            Bytes::from(err.to_string().into_bytes()),
        );
        self.state.go_away.send(&frame, true);
        let _ = self.writer.buffer(frame.into());

        self.state.streams.clear();
        self.closed = Some(reason);

        Err(err)
    }

    /// Isolating path: RST_STREAM the offender and carry on.
    fn stream_failure(&mut self, err: Http2Error) {
        debug_assert!(!err.is_connection_error());
        tracing::debug!("stream failure; err={}", err);

        let id = err.stream_id().expect("stream errors carry an id");
        let reason = err.reason();

        if let Some(stream) = self.state.streams.get_mut(id) {
            stream.state_mut().send_reset(reason);
            stream.clear_pending_send();
        }

        let _ = self.writer.buffer(frame::Reset::new(id, reason).into());
        self.state.streams.retire_if_closed(id);
    }
}

fn scope(err: StateError, id: StreamId) -> Http2Error {
    match err {
        StateError::Connection(reason) => Http2Error::connection(reason, "stream state violation"),
        StateError::Stream(reason) => Http2Error::stream(id, reason, "stream state violation"),
    }
}

/// Consumes client-preface octets. Returns the remaining input once all 24
/// have matched.
fn recv_preface(seen: usize, bytes: &[u8]) -> Result<(Preface, &[u8]), Http2Error> {
    let want = PREFACE.len() - seen;
    let take = want.min(bytes.len());

    if bytes[..take] != PREFACE[seen..seen + take] {
        return Err(Http2Error::connection(
            Reason::PROTOCOL_ERROR,
            "bad connection preface",
        ));
    }

    if take < want {
        Ok((Preface::Expecting(seen + take), &[]))
    } else {
        Ok((Preface::Done, &bytes[take..]))
    }
}
