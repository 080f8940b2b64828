mod flow_control;
mod priority;
mod state;
mod stream;

pub use flow_control::{ConsumeOverflow, RecvFlow, SendFlow, Window};
pub use priority::{PriorityTree, DEFAULT_WEIGHT};
pub use state::{State, StateError, StreamState};
pub use stream::{PropertyKey, Stream};

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::error::{Http2Error, UserError};
use crate::frame::{Reason, StreamId};
use crate::proto::{DEFAULT_CLOSED_STREAM_MAX, DEFAULT_CLOSED_STREAM_SECS};

/// Which side of the connection this endpoint plays. Determines stream id
/// parity: clients initiate odd ids, servers even.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn initiates(&self, id: StreamId) -> bool {
        match self {
            Role::Client => id.is_client_initiated(),
            Role::Server => id.is_server_initiated(),
        }
    }

    pub fn peer_initiates(&self, id: StreamId) -> bool {
        match self {
            Role::Client => id.is_server_initiated(),
            Role::Server => id.is_client_initiated(),
        }
    }

    fn first_id(&self) -> StreamId {
        match self {
            Role::Client => StreamId::from(1),
            Role::Server => StreamId::from(2),
        }
    }
}

/// The connection's stream table. Exclusively owns every live stream, tracks
/// id monotonicity for both peers, enforces the local concurrency limit, and
/// remembers recently closed streams so late frames are absorbed quietly.
#[derive(Debug)]
pub struct Streams {
    role: Role,
    streams: HashMap<StreamId, Stream>,
    priority: PriorityTree,

    /// Recently closed streams, newest last, bounded in count and age.
    closed: VecDeque<(StreamId, Instant)>,
    closed_max: usize,
    closed_grace: Duration,

    next_local_id: Option<StreamId>,
    last_remote_id: StreamId,

    /// Window defaults applied to newly created streams.
    send_initial_window: i32,
    recv_initial_window: u32,
    window_update_ratio: f64,

    max_concurrent: Option<u32>,
    next_property_key: u64,
}

impl Streams {
    pub fn new(role: Role, send_initial_window: i32, recv_initial_window: u32, ratio: f64) -> Streams {
        Streams {
            role,
            streams: HashMap::new(),
            priority: PriorityTree::new(),
            closed: VecDeque::new(),
            closed_max: DEFAULT_CLOSED_STREAM_MAX,
            closed_grace: Duration::from_secs(DEFAULT_CLOSED_STREAM_SECS),
            next_local_id: Some(role.first_id()),
            last_remote_id: StreamId::ZERO,
            send_initial_window,
            recv_initial_window,
            window_update_ratio: ratio,
            max_concurrent: None,
            next_property_key: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_max_concurrent(&mut self, max: Option<u32>) {
        self.max_concurrent = max;
    }

    pub fn last_remote_id(&self) -> StreamId {
        self.last_remote_id
    }

    /// The id the next locally initiated stream will get.
    pub fn peek_next_local_id(&self) -> Option<StreamId> {
        self.next_local_id
    }

    pub fn allocate_property_key(&mut self) -> PropertyKey {
        let key = PropertyKey(self.next_property_key);
        self.next_property_key += 1;
        key
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn priority(&self) -> &PriorityTree {
        &self.priority
    }

    pub fn priority_mut(&mut self) -> &mut PriorityTree {
        &mut self.priority
    }

    pub fn active_count(&self) -> usize {
        self.streams.len()
    }

    fn active_remote_count(&self) -> u32 {
        self.streams
            .keys()
            .filter(|id| self.role.peer_initiates(**id))
            .count() as u32
    }

    /// Allocates the next locally initiated stream id and creates the stream.
    pub fn open_local(&mut self) -> Result<&mut Stream, UserError> {
        let id = self.next_local_id.ok_or(UserError::OverflowedStreamId)?;
        self.next_local_id = id.next_id().ok();

        tracing::trace!("opening local stream {:?}", id);
        Ok(self.insert(id))
    }

    /// Creates a locally initiated stream for a caller-chosen id, enforcing
    /// parity and monotonicity.
    pub fn open_local_with_id(&mut self, id: StreamId) -> Result<&mut Stream, UserError> {
        if !self.role.initiates(id) {
            return Err(UserError::InactiveStreamId);
        }

        match self.next_local_id {
            Some(next) if id >= next => {
                self.next_local_id = id.next_id().ok();
                Ok(self.insert(id))
            }
            _ => Err(UserError::InactiveStreamId),
        }
    }

    /// Reserves a locally promised stream (PUSH_PROMISE sent).
    pub fn reserve_local(&mut self) -> Result<&mut Stream, UserError> {
        let stream = self.open_local()?;
        stream
            .state_mut()
            .reserve_local()
            .expect("fresh stream is idle");
        Ok(stream)
    }

    /// Accepts a peer-initiated stream id for HEADERS, creating the stream.
    ///
    /// Ids must carry the peer's parity and rise monotonically; an id at or
    /// below the last observed one that no longer has a table entry refers to
    /// a closed stream. Exceeding the local concurrency limit refuses the
    /// stream rather than the connection.
    pub fn open_remote(&mut self, id: StreamId) -> Result<&mut Stream, Http2Error> {
        if self.streams.contains_key(&id) {
            return Ok(self.streams.get_mut(&id).expect("checked"));
        }

        if !self.role.peer_initiates(id) {
            return Err(Http2Error::connection(
                Reason::PROTOCOL_ERROR,
                "peer opened a stream with our parity",
            ));
        }

        if id <= self.last_remote_id {
            // Not new, not live: closed or never opened.
            if self.is_recently_closed(id) {
                return Err(Http2Error::stream(
                    id,
                    Reason::STREAM_CLOSED,
                    "headers on closed stream",
                ));
            }
            return Err(Http2Error::connection(
                Reason::PROTOCOL_ERROR,
                "peer re-used a closed stream id",
            ));
        }

        if let Some(max) = self.max_concurrent {
            if self.active_remote_count() >= max {
                return Err(Http2Error::stream(
                    id,
                    Reason::REFUSED_STREAM,
                    "max concurrent streams exceeded",
                ));
            }
        }

        self.last_remote_id = id;
        tracing::trace!("opening remote stream {:?}", id);
        Ok(self.insert(id))
    }

    /// Reserves a peer-promised stream (PUSH_PROMISE received).
    pub fn reserve_remote(&mut self, promised_id: StreamId) -> Result<&mut Stream, Http2Error> {
        let stream = self.open_remote(promised_id)?;
        stream.state_mut().reserve_remote().map_err(|e| match e {
            StateError::Connection(reason) => {
                Http2Error::connection(reason, "promised stream not idle")
            }
            StateError::Stream(reason) => {
                Http2Error::stream(promised_id, reason, "promised stream not idle")
            }
        })?;
        Ok(stream)
    }

    fn insert(&mut self, id: StreamId) -> &mut Stream {
        let stream = Stream::new(
            id,
            self.send_initial_window,
            self.recv_initial_window,
            self.window_update_ratio,
        );
        self.priority.ensure(id);
        self.streams.entry(id).or_insert(stream)
    }

    /// Retires a stream whose state reached CLOSED: drops it from the table
    /// and remembers the id for the grace period.
    pub fn retire_if_closed(&mut self, id: StreamId) {
        let closed = match self.streams.get(&id) {
            Some(stream) => stream.state().is_closed(),
            None => false,
        };

        if closed {
            self.retire(id);
        }
    }

    fn retire(&mut self, id: StreamId) {
        tracing::trace!("retiring stream {:?}", id);
        self.streams.remove(&id);
        self.priority.remove(id);

        let now = Instant::now();
        self.closed.push_back((id, now));

        while self.closed.len() > self.closed_max {
            self.closed.pop_front();
        }
        while let Some(&(_, at)) = self.closed.front() {
            if now.duration_since(at) > self.closed_grace {
                self.closed.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether `id` was retired recently enough that late frames for it are
    /// absorbed rather than treated as protocol violations.
    pub fn is_recently_closed(&self, id: StreamId) -> bool {
        let now = Instant::now();
        self.closed
            .iter()
            .any(|&(closed_id, at)| closed_id == id && now.duration_since(at) <= self.closed_grace)
    }

    /// Whether `id` refers to a stream neither side ever opened.
    pub fn is_idle(&self, id: StreamId) -> bool {
        if self.role.peer_initiates(id) {
            id > self.last_remote_id
        } else {
            match self.next_local_id {
                Some(next) => id >= next,
                None => false,
            }
        }
    }

    /// Applies the peer's INITIAL_WINDOW_SIZE delta to every live stream's
    /// send window. Windows may legally go negative.
    pub fn apply_remote_initial_delta(&mut self, delta: i32) -> Result<(), Http2Error> {
        self.send_initial_window = self
            .send_initial_window
            .checked_add(delta)
            .ok_or_else(|| {
                Http2Error::connection(Reason::FLOW_CONTROL_ERROR, "initial window size overflow")
            })?;

        for stream in self.streams.values_mut() {
            stream.send_flow_mut().apply_initial_delta(delta).map_err(|reason| {
                Http2Error::connection(reason, "initial window size overflow on stream")
            })?;
        }
        Ok(())
    }

    /// Applies our own INITIAL_WINDOW_SIZE change to every live stream's
    /// receive accounting.
    pub fn apply_local_initial_delta(&mut self, delta: i32) {
        self.recv_initial_window = (self.recv_initial_window as i64 + delta as i64).max(0) as u32;

        for stream in self.streams.values_mut() {
            stream.recv_flow_mut().apply_initial_delta(delta);
        }
    }

    /// Ids of streams with parked writes, for resumption scans.
    pub fn ids_with_pending_send(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self
            .streams
            .values()
            .filter(|s| s.has_pending_send())
            .map(|s| s.id())
            .collect();
        ids.sort();
        ids
    }

    /// Drops every stream; used on connection teardown.
    pub fn clear(&mut self) {
        for stream in self.streams.values_mut() {
            stream.clear_pending_send();
        }
        self.streams.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(role: Role) -> Streams {
        Streams::new(role, 65_535, 65_535, 0.5)
    }

    #[test]
    fn local_ids_follow_parity() {
        let mut streams = table(Role::Client);
        assert_eq!(streams.open_local().unwrap().id(), StreamId::from(1));
        assert_eq!(streams.open_local().unwrap().id(), StreamId::from(3));

        let mut streams = table(Role::Server);
        assert_eq!(streams.open_local().unwrap().id(), StreamId::from(2));
        assert_eq!(streams.open_local().unwrap().id(), StreamId::from(4));
    }

    #[test]
    fn remote_ids_must_use_peer_parity() {
        let mut streams = table(Role::Server);
        assert!(streams.open_remote(StreamId::from(1)).is_ok());

        let err = streams.open_remote(StreamId::from(2)).unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
    }

    #[test]
    fn remote_ids_must_rise() {
        let mut streams = table(Role::Server);
        streams.open_remote(StreamId::from(5)).unwrap();

        // An id below the high-water mark that is neither live nor recently
        // closed means the peer re-used an id.
        let err = streams.open_remote(StreamId::from(3)).unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn recently_closed_streams_get_stream_scope() {
        let mut streams = table(Role::Server);
        {
            let stream = streams.open_remote(StreamId::from(1)).unwrap();
            stream.state_mut().recv_open(false).unwrap();
            stream.state_mut().recv_reset(Reason::CANCEL);
        }
        streams.retire_if_closed(StreamId::from(1));
        assert!(streams.is_recently_closed(StreamId::from(1)));

        let err = streams.open_remote(StreamId::from(1)).unwrap_err();
        assert!(!err.is_connection_error());
        assert_eq!(err.reason(), Reason::STREAM_CLOSED);
    }

    #[test]
    fn concurrency_limit_refuses_stream() {
        let mut streams = table(Role::Server);
        streams.set_max_concurrent(Some(1));

        streams.open_remote(StreamId::from(1)).unwrap();
        let err = streams.open_remote(StreamId::from(3)).unwrap_err();
        assert!(!err.is_connection_error());
        assert_eq!(err.reason(), Reason::REFUSED_STREAM);
        assert_eq!(err.stream_id(), Some(StreamId::from(3)));
    }

    #[test]
    fn closed_lru_is_bounded() {
        let mut streams = table(Role::Server);
        for i in 0..15u32 {
            let id = StreamId::from(2 * i + 1);
            let stream = streams.open_remote(id).unwrap();
            stream.state_mut().recv_open(true).unwrap();
            stream.state_mut().recv_reset(Reason::CANCEL);
            streams.retire_if_closed(id);
        }

        // Only the most recent ten are remembered.
        assert!(!streams.is_recently_closed(StreamId::from(1)));
        assert!(streams.is_recently_closed(StreamId::from(29)));
    }

    #[test]
    fn remote_initial_delta_reaches_all_streams() {
        let mut streams = table(Role::Server);
        streams.open_remote(StreamId::from(1)).unwrap();
        streams.open_remote(StreamId::from(3)).unwrap();

        streams.apply_remote_initial_delta(-65_535).unwrap();
        assert_eq!(
            streams.get(StreamId::from(1)).unwrap().send_flow().available(),
            0
        );
        assert_eq!(
            streams.get(StreamId::from(3)).unwrap().send_flow().available(),
            0
        );

        // New streams start from the shifted initial window.
        let s5 = streams.open_remote(StreamId::from(5)).unwrap();
        assert_eq!(s5.send_flow().available(), 0);
    }

    #[test]
    fn property_keys_are_unique() {
        let mut streams = table(Role::Client);
        let a = streams.allocate_property_key();
        let b = streams.allocate_property_key();
        assert_ne!(a, b);
    }
}
