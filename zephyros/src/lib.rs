//! An HTTP/2 codec core: RFC 7540 framing, RFC 7541 HPACK header
//! compression, connection and stream state tracking, and two-level flow
//! control.
//!
//! The crate is sans-io. A [`Connection`] is fed raw transport bytes through
//! [`Connection::recv_bytes`], which parses frames, runs the protocol state
//! machines and invokes a [`FrameListener`]; outbound operations and the
//! codec's own replies (SETTINGS ACK, PING ACK, WINDOW_UPDATE, GOAWAY,
//! RST_STREAM) accumulate in an internal write buffer drained with
//! [`Connection::take_output`]. Scheduling, sockets and TLS belong to the
//! embedding transport.
//!
//! ```no_run
//! use zephyros::{Connection, FrameListener, Http2Config};
//!
//! struct App;
//! impl FrameListener for App {}
//!
//! let mut conn = Connection::new(Http2Config::client());
//! let mut app = App;
//!
//! // write conn.take_output() to the socket, then for each read:
//! # let socket_bytes: &[u8] = &[];
//! conn.recv_bytes(socket_bytes, &mut app)?;
//! # Ok::<(), zephyros::Http2Error>(())
//! ```
//!
//! Errors follow the protocol's two scopes: a connection error queues GOAWAY
//! and poisons the codec; a stream error queues RST_STREAM and the connection
//! carries on.

mod codec;
mod decompress;
mod error;
mod listener;
mod proto;

pub mod frame;
pub mod hpack;

pub use codec::{Connection, FrameReader, FrameWriter, Http2Config, PREFACE};
pub use decompress::{DecompressingListener, StreamInflater};
pub use error::{Http2Error, SendError, UserError};
pub use frame::{PingPayload, Reason, Settings, StreamDependency, StreamId};
pub use hpack::{HeaderField, HeaderList};
pub use listener::{FrameListener, ListenerDecorator, NopListener};
pub use proto::{PriorityTree, PropertyKey, Role, StreamState, MAX_WINDOW_SIZE};
