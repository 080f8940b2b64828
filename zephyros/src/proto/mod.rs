pub(crate) mod connection;
pub(crate) mod go_away;
pub(crate) mod streams;

pub use streams::{PriorityTree, PropertyKey, Role, StreamState};

pub type WindowSize = u32;

pub const MAX_WINDOW_SIZE: WindowSize = (1 << 31) - 1;

/// How many recently closed streams are remembered, and for how long, so late
/// frames on them are absorbed instead of failing the connection.
pub const DEFAULT_CLOSED_STREAM_MAX: usize = 10;
pub const DEFAULT_CLOSED_STREAM_SECS: u64 = 30;
