use std::any::Any;
use std::collections::{HashMap, VecDeque};

use crate::frame::{self, StreamId};
use crate::proto::streams::flow_control::{RecvFlow, SendFlow};
use crate::proto::streams::state::State;

/// An opaque key for user-attached stream properties, allocated by the
/// connection so independent layers never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyKey(pub(crate) u64);

/// One HTTP/2 stream: lifecycle state, both flow-control windows, writes
/// parked behind the send window, and user properties.
#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    state: State,
    send_flow: SendFlow,
    recv_flow: RecvFlow,
    pending_send: VecDeque<frame::Data>,
    properties: HashMap<u64, Box<dyn Any>>,
}

impl Stream {
    pub fn new(id: StreamId, send_window: i32, recv_window: u32, ratio: f64) -> Stream {
        Stream {
            id,
            state: State::default(),
            send_flow: SendFlow::new(send_window),
            recv_flow: RecvFlow::new(recv_window, ratio),
            pending_send: VecDeque::new(),
            properties: HashMap::new(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn send_flow(&self) -> &SendFlow {
        &self.send_flow
    }

    pub fn send_flow_mut(&mut self) -> &mut SendFlow {
        &mut self.send_flow
    }

    pub fn recv_flow(&self) -> &RecvFlow {
        &self.recv_flow
    }

    pub fn recv_flow_mut(&mut self) -> &mut RecvFlow {
        &mut self.recv_flow
    }

    pub fn park_send(&mut self, frame: frame::Data) {
        tracing::trace!("parking DATA; stream={:?}", self.id);
        self.pending_send.push_back(frame);
    }

    pub fn has_pending_send(&self) -> bool {
        !self.pending_send.is_empty()
    }

    /// Next parked frame, if the stream window admits it. The caller also
    /// checks the connection window.
    pub fn pop_sendable(&mut self, connection_available: u32) -> Option<frame::Data> {
        let front_len = self.pending_send.front()?.flow_len();

        if front_len > self.send_flow.available() || front_len > connection_available {
            return None;
        }

        self.pending_send.pop_front()
    }

    /// Drops parked writes; used on reset and teardown.
    pub fn clear_pending_send(&mut self) {
        if !self.pending_send.is_empty() {
            tracing::trace!(
                "dropping {} queued writes; stream={:?}",
                self.pending_send.len(),
                self.id
            );
            self.pending_send.clear();
        }
    }

    pub fn set_property(&mut self, key: PropertyKey, value: Box<dyn Any>) {
        self.properties.insert(key.0, value);
    }

    pub fn property(&self, key: PropertyKey) -> Option<&(dyn Any + 'static)> {
        self.properties.get(&key.0).map(|b| &**b)
    }

    pub fn property_mut(&mut self, key: PropertyKey) -> Option<&mut (dyn Any + 'static)> {
        self.properties.get_mut(&key.0).map(|b| &mut **b)
    }

    pub fn take_property(&mut self, key: PropertyKey) -> Option<Box<dyn Any>> {
        self.properties.remove(&key.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn data(id: u32, payload: &'static [u8]) -> frame::Data {
        frame::Data::new(StreamId::from(id), Bytes::from_static(payload))
    }

    #[test]
    fn parked_frames_respect_both_windows() {
        let mut stream = Stream::new(StreamId::from(1), 5, 65_535, 0.5);
        stream.park_send(data(1, b"hello"));

        // Connection window too small.
        assert!(stream.pop_sendable(4).is_none());

        // Both windows fit.
        let frame = stream.pop_sendable(100).unwrap();
        assert_eq!(frame.payload(), &Bytes::from_static(b"hello"));
        assert!(!stream.has_pending_send());
    }

    #[test]
    fn parked_frames_respect_stream_window() {
        let mut stream = Stream::new(StreamId::from(1), 3, 65_535, 0.5);
        stream.park_send(data(1, b"hello"));
        assert!(stream.pop_sendable(100).is_none());

        stream.send_flow_mut().inc_window(2).unwrap();
        assert!(stream.pop_sendable(100).is_some());
    }

    #[test]
    fn properties_round_trip() {
        let mut stream = Stream::new(StreamId::from(1), 0, 0, 0.5);
        let key = PropertyKey(7);

        stream.set_property(key, Box::new(42u32));
        let value = stream.property(key).unwrap().downcast_ref::<u32>();
        assert_eq!(value, Some(&42));

        let taken = stream.take_property(key).unwrap();
        assert_eq!(taken.downcast_ref::<u32>(), Some(&42));
        assert!(stream.property(key).is_none());
    }
}
