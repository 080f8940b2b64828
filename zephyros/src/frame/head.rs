use bytes::BufMut;

use crate::frame::StreamId;

/// A decoded 9-octet frame header.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Head {
    kind: Kind,
    flag: u8,
    stream_id: StreamId,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Kind {
    Data = 0,
    Headers = 1,
    Priority = 2,
    Reset = 3,
    Settings = 4,
    PushPromise = 5,
    Ping = 6,
    GoAway = 7,
    WindowUpdate = 8,
    Continuation = 9,
    Unknown,
}

impl Head {
    pub fn new(kind: Kind, flag: u8, stream_id: StreamId) -> Head {
        Head {
            kind,
            flag,
            stream_id,
        }
    }

    /// Parses type, flags and stream id out of the last six octets of a frame
    /// header. The length lives in the first three and is handled by the
    /// reader, which needs it before the rest of the frame arrives.
    pub fn parse(header: &[u8]) -> Head {
        let (stream_id, _) = StreamId::parse(&header[5..]);

        Head {
            kind: Kind::new(header[3]),
            flag: header[4],
            stream_id,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn flag(&self) -> u8 {
        self.flag
    }

    pub fn encode_len(&self) -> usize {
        super::HEADER_LEN
    }

    pub fn encode<T: BufMut>(&self, payload_len: usize, dst: &mut T) {
        debug_assert!(self.encode_len() <= dst.remaining_mut());
        debug_assert!(payload_len < (1 << 24));

        dst.put_uint(payload_len as u64, 3);
        dst.put_u8(self.kind as u8);
        dst.put_u8(self.flag);
        dst.put_u32(self.stream_id.into());
    }
}

impl Kind {
    pub fn new(byte: u8) -> Kind {
        match byte {
            0 => Kind::Data,
            1 => Kind::Headers,
            2 => Kind::Priority,
            3 => Kind::Reset,
            4 => Kind::Settings,
            5 => Kind::PushPromise,
            6 => Kind::Ping,
            7 => Kind::GoAway,
            8 => Kind::WindowUpdate,
            9 => Kind::Continuation,
            _ => Kind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_header_fields() {
        let raw = [0x00, 0x00, 0x08, 0x06, 0x01, 0x00, 0x00, 0x00, 0x00];
        let head = Head::parse(&raw);
        assert_eq!(head.kind(), Kind::Ping);
        assert_eq!(head.flag(), 0x01);
        assert_eq!(head.stream_id(), StreamId::ZERO);
    }

    #[test]
    fn encode_round_trips() {
        let head = Head::new(Kind::Headers, 0x04, StreamId::from(5));
        let mut dst = Vec::new();
        head.encode(16, &mut dst);

        assert_eq!(dst.len(), 9);
        assert_eq!(&dst[..3], &[0, 0, 16]);
        assert_eq!(Head::parse(&dst), head);
    }

    #[test]
    fn unknown_kind() {
        assert_eq!(Kind::new(10), Kind::Unknown);
        assert_eq!(Kind::new(0xff), Kind::Unknown);
    }
}
