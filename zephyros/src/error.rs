use std::borrow::Cow;
use std::{error, fmt};

use crate::frame::{Reason, StreamId};

/// A protocol failure, scoped either to the whole connection or to a single
/// stream.
///
/// Connection errors are fatal: the codec emits GOAWAY carrying the reason,
/// flushes, and closes. Stream errors isolate: the codec emits RST_STREAM on
/// the offending stream and the connection continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Http2Error {
    Connection {
        reason: Reason,
        message: Cow<'static, str>,
    },
    Stream {
        id: StreamId,
        reason: Reason,
        message: Cow<'static, str>,
    },
}

impl Http2Error {
    pub fn connection(reason: Reason, message: impl Into<Cow<'static, str>>) -> Http2Error {
        Http2Error::Connection {
            reason,
            message: message.into(),
        }
    }

    pub fn stream(
        id: StreamId,
        reason: Reason,
        message: impl Into<Cow<'static, str>>,
    ) -> Http2Error {
        Http2Error::Stream {
            id,
            reason,
            message: message.into(),
        }
    }

    pub fn reason(&self) -> Reason {
        match *self {
            Http2Error::Connection { reason, .. } => reason,
            Http2Error::Stream { reason, .. } => reason,
        }
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        match *self {
            Http2Error::Connection { .. } => None,
            Http2Error::Stream { id, .. } => Some(id),
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(*self, Http2Error::Connection { .. })
    }
}

impl fmt::Display for Http2Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Http2Error::Connection {
                reason,
                ref message,
            } => {
                write!(fmt, "connection error ({:?}): {}", reason, message)
            }
            Http2Error::Stream {
                id,
                reason,
                ref message,
            } => {
                write!(fmt, "stream {} error ({:?}): {}", id, reason, message)
            }
        }
    }
}

impl error::Error for Http2Error {}

/// Misuse of the codec surface by the embedding application, as opposed to a
/// wire-level protocol failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserError {
    InactiveStreamId,
    UnexpectedFrameType,
    PayloadTooBig,
    Rejected,
    ReleaseCapacityTooBig,
    OverflowedStreamId,
    SendPingWhilePending,
    SendSettingsWhilePending,
    PeerDisabledServerPush,
    GoingAway,
}

impl fmt::Display for UserError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::UserError::*;

        fmt.write_str(match *self {
            InactiveStreamId => "inactive stream",
            UnexpectedFrameType => "unexpected frame type",
            PayloadTooBig => "payload too big",
            Rejected => "rejected",
            ReleaseCapacityTooBig => "release capacity too big",
            OverflowedStreamId => "stream ID overflowed",
            SendPingWhilePending => "send_ping before received previous pong",
            SendSettingsWhilePending => "sending SETTINGS before received previous ACK",
            PeerDisabledServerPush => "sending PUSH_PROMISE to peer who disabled server push",
            GoingAway => "connection is going away",
        })
    }
}

impl error::Error for UserError {}

/// Failure of an outbound operation: either the caller misused the surface,
/// or the connection is no longer in a state to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    User(UserError),
    Http2(Http2Error),
}

impl From<UserError> for SendError {
    fn from(src: UserError) -> SendError {
        SendError::User(src)
    }
}

impl From<Http2Error> for SendError {
    fn from(src: Http2Error) -> SendError {
        SendError::Http2(src)
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SendError::User(ref e) => write!(fmt, "user error: {}", e),
            SendError::Http2(ref e) => e.fmt(fmt),
        }
    }
}

impl error::Error for SendError {}
