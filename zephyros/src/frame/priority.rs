use bytes::BufMut;
use std::fmt;

use crate::frame::{Error, Frame, Head, Kind, StreamId};

/// A PRIORITY frame: five octets of dependency information.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct Priority {
    stream_id: StreamId,
    dependency: StreamDependency,
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct StreamDependency {
    dependency_id: StreamId,

    /// Wire weight, 0..=255; the effective weight is this plus one.
    weight: u8,

    is_exclusive: bool,
}

impl Priority {
    pub fn new(stream_id: StreamId, dependency: StreamDependency) -> Self {
        Priority {
            stream_id,
            dependency,
        }
    }

    pub(crate) fn load(head: Head, payload: &[u8]) -> Result<Self, Error> {
        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }
        if payload.len() != 5 {
            return Err(Error::InvalidPayloadLength);
        }

        let dependency = StreamDependency::load(payload)?;

        if dependency.dependency_id() == head.stream_id() {
            return Err(Error::InvalidDependencyId);
        }

        Ok(Priority {
            stream_id: head.stream_id(),
            dependency,
        })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn dependency(&self) -> StreamDependency {
        self.dependency
    }

    pub(crate) fn head(&self) -> Head {
        Head::new(Kind::Priority, 0, self.stream_id)
    }

    pub(crate) fn encode<T: BufMut>(&self, dst: &mut T) {
        self.head().encode(5, dst);
        self.dependency.encode(dst);
    }
}

impl From<Priority> for Frame {
    fn from(src: Priority) -> Self {
        Frame::Priority(src)
    }
}

impl StreamDependency {
    pub fn new(dependency_id: StreamId, weight: u8, is_exclusive: bool) -> Self {
        StreamDependency {
            dependency_id,
            weight,
            is_exclusive,
        }
    }

    pub fn load(src: &[u8]) -> Result<Self, Error> {
        if src.len() < 5 {
            return Err(Error::InvalidPayloadLength);
        }

        let (dependency_id, is_exclusive) = StreamId::parse(src);

        Ok(StreamDependency::new(dependency_id, src[4], is_exclusive))
    }

    pub fn dependency_id(&self) -> StreamId {
        self.dependency_id
    }

    pub fn weight(&self) -> u8 {
        self.weight
    }

    pub fn is_exclusive(&self) -> bool {
        self.is_exclusive
    }

    pub(crate) fn encode<T: BufMut>(&self, dst: &mut T) {
        let mut raw: u32 = self.dependency_id.into();
        if self.is_exclusive {
            raw |= 1 << 31;
        }
        dst.put_u32(raw);
        dst.put_u8(self.weight);
    }
}

impl fmt::Display for StreamDependency {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "depends on {} (weight {}{})",
            self.dependency_id,
            self.weight as u16 + 1,
            if self.is_exclusive { ", exclusive" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_exclusive_dependency() {
        let head = Head::new(Kind::Priority, 0, StreamId::from(5));
        let payload = [0x80, 0x00, 0x00, 0x03, 15];

        let priority = Priority::load(head, &payload).unwrap();
        assert_eq!(priority.dependency().dependency_id(), StreamId::from(3));
        assert_eq!(priority.dependency().weight(), 15);
        assert!(priority.dependency().is_exclusive());
    }

    #[test]
    fn self_dependency_rejected() {
        let head = Head::new(Kind::Priority, 0, StreamId::from(3));
        let payload = [0x00, 0x00, 0x00, 0x03, 0];
        assert!(matches!(
            Priority::load(head, &payload),
            Err(Error::InvalidDependencyId)
        ));
    }

    #[test]
    fn wrong_length_rejected() {
        let head = Head::new(Kind::Priority, 0, StreamId::from(3));
        assert!(matches!(
            Priority::load(head, &[0; 4]),
            Err(Error::InvalidPayloadLength)
        ));
    }

    #[test]
    fn encode_round_trips() {
        let dep = StreamDependency::new(StreamId::from(7), 200, false);
        let priority = Priority::new(StreamId::from(9), dep);

        let mut dst = Vec::new();
        priority.encode(&mut dst);

        let head = Head::parse(&dst[..9]);
        assert_eq!(Priority::load(head, &dst[9..]).unwrap(), priority);
    }
}
