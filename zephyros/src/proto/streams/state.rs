use crate::frame::Reason;

use self::Inner::*;

/// The per-stream lifecycle state machine.
///
/// ```text
/// IDLE --send H--> OPEN            IDLE --recv H--> OPEN
/// IDLE --send PP--> RESERVED_LOCAL IDLE --recv PP--> RESERVED_REMOTE
/// OPEN --send ES--> HC_LOCAL       OPEN --recv ES--> HC_REMOTE
/// HC_REMOTE --send ES--> CLOSED    HC_LOCAL --recv ES--> CLOSED
/// any --send/recv RST--> CLOSED
/// ```
#[derive(Debug, Clone)]
pub struct State {
    inner: Inner,
}

/// Externally visible stream states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

#[derive(Debug, Clone, Copy)]
enum Inner {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed(Cause),
}

#[derive(Debug, Clone, Copy)]
enum Cause {
    EndStream,
    LocallyReset(Reason),
    RemotelyReset(Reason),
}

/// A transition failure, scoped like the error it must become. The stream
/// table attaches the stream id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    Connection(Reason),
    Stream(Reason),
}

impl State {
    /// Locally sent HEADERS. `eos` is the END_STREAM flag.
    pub fn send_open(&mut self, eos: bool) -> Result<(), StateError> {
        self.inner = match self.inner {
            Idle => {
                if eos {
                    HalfClosedLocal
                } else {
                    Open
                }
            }
            ReservedLocal => {
                if eos {
                    Closed(Cause::EndStream)
                } else {
                    HalfClosedRemote
                }
            }
            // Responses and trailers on a live stream: only END_STREAM moves
            // the state.
            Open | HalfClosedRemote if eos => return self.send_close(),
            state @ (Open | HalfClosedRemote) => state,
            state => {
                tracing::trace!("send_open in unexpected state {:?}", state);
                return Err(StateError::Stream(Reason::STREAM_CLOSED));
            }
        };

        Ok(())
    }

    /// Peer-initiated HEADERS. Returns whether the stream was newly opened.
    pub fn recv_open(&mut self, eos: bool) -> Result<bool, StateError> {
        let mut initial = false;

        self.inner = match self.inner {
            Idle => {
                initial = true;
                if eos {
                    HalfClosedRemote
                } else {
                    Open
                }
            }
            ReservedRemote => {
                initial = true;
                if eos {
                    Closed(Cause::EndStream)
                } else {
                    HalfClosedLocal
                }
            }
            // Trailers close the remote half; interim header blocks (1xx)
            // leave the state alone.
            Open | HalfClosedLocal if eos => return self.recv_close().map(|_| false),
            state @ (Open | HalfClosedLocal) => state,
            HalfClosedRemote | Closed(..) => {
                return Err(StateError::Stream(Reason::STREAM_CLOSED));
            }
            state => {
                tracing::trace!("recv_open in unexpected state {:?}", state);
                return Err(StateError::Connection(Reason::PROTOCOL_ERROR));
            }
        };

        Ok(initial)
    }

    pub fn reserve_local(&mut self) -> Result<(), StateError> {
        match self.inner {
            Idle => {
                self.inner = ReservedLocal;
                Ok(())
            }
            _ => Err(StateError::Stream(Reason::PROTOCOL_ERROR)),
        }
    }

    pub fn reserve_remote(&mut self) -> Result<(), StateError> {
        match self.inner {
            Idle => {
                self.inner = ReservedRemote;
                Ok(())
            }
            state => {
                tracing::trace!("reserve_remote in unexpected state {:?}", state);
                Err(StateError::Connection(Reason::PROTOCOL_ERROR))
            }
        }
    }

    /// A frame with END_STREAM arrived.
    pub fn recv_close(&mut self) -> Result<(), StateError> {
        match self.inner {
            Open => {
                tracing::trace!("recv_close: Open => HalfClosedRemote");
                self.inner = HalfClosedRemote;
                Ok(())
            }
            HalfClosedLocal => {
                tracing::trace!("recv_close: HalfClosedLocal => Closed");
                self.inner = Closed(Cause::EndStream);
                Ok(())
            }
            _ => Err(StateError::Stream(Reason::STREAM_CLOSED)),
        }
    }

    /// A frame with END_STREAM was sent.
    pub fn send_close(&mut self) -> Result<(), StateError> {
        match self.inner {
            Open => {
                tracing::trace!("send_close: Open => HalfClosedLocal");
                self.inner = HalfClosedLocal;
                Ok(())
            }
            HalfClosedRemote => {
                tracing::trace!("send_close: HalfClosedRemote => Closed");
                self.inner = Closed(Cause::EndStream);
                Ok(())
            }
            _ => Err(StateError::Stream(Reason::STREAM_CLOSED)),
        }
    }

    /// Inbound DATA is admissible only while the remote half is open.
    pub fn ensure_recv_data(&self) -> Result<(), StateError> {
        match self.inner {
            Open | HalfClosedLocal => Ok(()),
            Closed(..) | HalfClosedRemote => Err(StateError::Stream(Reason::STREAM_CLOSED)),
            state => {
                tracing::trace!("recv_data in unexpected state {:?}", state);
                Err(StateError::Connection(Reason::PROTOCOL_ERROR))
            }
        }
    }

    /// Outbound DATA is admissible only while the local half is open.
    pub fn ensure_send_data(&self) -> Result<(), StateError> {
        match self.inner {
            Open | HalfClosedRemote => Ok(()),
            _ => Err(StateError::Stream(Reason::STREAM_CLOSED)),
        }
    }

    pub fn recv_reset(&mut self, reason: Reason) {
        match self.inner {
            Closed(..) => {}
            state => {
                tracing::trace!("recv_reset; reason={:?}; state={:?}", reason, state);
                self.inner = Closed(Cause::RemotelyReset(reason));
            }
        }
    }

    pub fn send_reset(&mut self, reason: Reason) {
        match self.inner {
            Closed(..) => {}
            state => {
                tracing::trace!("send_reset; reason={:?}; state={:?}", reason, state);
                self.inner = Closed(Cause::LocallyReset(reason));
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.inner, Closed(..))
    }

    pub fn is_reset(&self) -> bool {
        matches!(
            self.inner,
            Closed(Cause::LocallyReset(..)) | Closed(Cause::RemotelyReset(..))
        )
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.inner, Idle)
    }

    pub fn is_send_closed(&self) -> bool {
        matches!(self.inner, Closed(..) | HalfClosedLocal | ReservedRemote)
    }

    pub fn is_recv_closed(&self) -> bool {
        matches!(self.inner, Closed(..) | HalfClosedRemote | ReservedLocal)
    }

    pub fn current(&self) -> StreamState {
        match self.inner {
            Idle => StreamState::Idle,
            ReservedLocal => StreamState::ReservedLocal,
            ReservedRemote => StreamState::ReservedRemote,
            Open => StreamState::Open,
            HalfClosedLocal => StreamState::HalfClosedLocal,
            HalfClosedRemote => StreamState::HalfClosedRemote,
            Closed(..) => StreamState::Closed,
        }
    }
}

impl Default for State {
    fn default() -> State {
        State { inner: Inner::Idle }
    }
}
