use bytes::BufMut;

use crate::frame::{util, Error, Frame, Head, Kind, StreamId};

/// A WINDOW_UPDATE frame. Stream id zero addresses the connection window.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct WindowUpdate {
    stream_id: StreamId,
    size_increment: u32,
}

impl WindowUpdate {
    pub fn new(stream_id: StreamId, size_increment: u32) -> Self {
        WindowUpdate {
            stream_id,
            size_increment,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn size_increment(&self) -> u32 {
        self.size_increment
    }

    pub(crate) fn load(head: Head, payload: &[u8]) -> Result<WindowUpdate, Error> {
        debug_assert_eq!(head.kind(), Kind::WindowUpdate);
        if payload.len() != 4 {
            return Err(Error::BadFrameSize);
        }

        // The increment shares the reserved-bit layout of a stream id.
        let size_increment = util::unpack_u32(payload, 0) & !(1 << 31);

        if size_increment == 0 {
            return Err(Error::InvalidWindowUpdateValue);
        }

        Ok(WindowUpdate {
            stream_id: head.stream_id(),
            size_increment,
        })
    }

    pub(crate) fn encode<B: BufMut>(&self, dst: &mut B) {
        tracing::trace!("encoding WINDOW_UPDATE; id={:?}", self.stream_id);

        let head = Head::new(Kind::WindowUpdate, 0, self.stream_id);
        head.encode(4, dst);
        dst.put_u32(self.size_increment);
    }
}

impl From<WindowUpdate> for Frame {
    fn from(src: WindowUpdate) -> Self {
        Frame::WindowUpdate(src)
    }
}
