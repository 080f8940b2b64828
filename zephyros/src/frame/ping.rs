use bytes::BufMut;

use crate::frame::{Error, Frame, Head, Kind, StreamId};

pub type Payload = [u8; 8];

/// A PING frame: eight opaque octets, optionally flagged as an ACK.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct Ping {
    ack: bool,
    payload: Payload,
}

const ACK_FLAG: u8 = 0x1;

impl Ping {
    pub fn new(payload: Payload) -> Ping {
        Ping {
            ack: false,
            payload,
        }
    }

    pub fn pong(payload: Payload) -> Ping {
        Ping { ack: true, payload }
    }

    pub fn is_ack(&self) -> bool {
        self.ack
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub(crate) fn load(head: Head, bytes: &[u8]) -> Result<Ping, Error> {
        debug_assert_eq!(head.kind(), Kind::Ping);

        // PING is connection-scoped only.
        if !head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        if bytes.len() != 8 {
            return Err(Error::BadFrameSize);
        }

        let mut payload = [0; 8];
        payload.copy_from_slice(bytes);

        let ack = head.flag() & ACK_FLAG != 0;

        Ok(Ping { ack, payload })
    }

    pub(crate) fn encode<B: BufMut>(&self, dst: &mut B) {
        let sz = self.payload.len();
        let flags = if self.ack { ACK_FLAG } else { 0 };
        let head = Head::new(Kind::Ping, flags, StreamId::ZERO);

        head.encode(sz, dst);
        dst.put_slice(&self.payload);
    }
}

impl From<Ping> for Frame {
    fn from(src: Ping) -> Self {
        Frame::Ping(src)
    }
}
