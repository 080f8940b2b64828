use crate::frame::{self, Reason, StreamId};

/// GOAWAY bookkeeping for both directions.
///
/// Once either side signals shutdown, no new streams may be created toward
/// it; streams at or below the advertised last id run to completion.
#[derive(Debug, Default)]
pub struct GoAway {
    /// Set once we have sent (or queued) a GOAWAY.
    sent: Option<GoingAway>,
    /// Set once the peer's GOAWAY arrived.
    received: Option<GoingAway>,
    /// Whether the connection should close as soon as the pending frame and
    /// buffered writes drain.
    close_now: bool,
}

#[derive(Debug, Clone, Copy)]
struct GoingAway {
    last_stream_id: StreamId,
    reason: Reason,
}

impl GoAway {
    pub fn new() -> GoAway {
        GoAway::default()
    }

    pub fn recv(&mut self, frame: &frame::GoAway) {
        tracing::debug!(
            "received GOAWAY; last_stream_id={:?} reason={:?}",
            frame.last_stream_id(),
            frame.reason()
        );
        self.received = Some(GoingAway {
            last_stream_id: frame.last_stream_id(),
            reason: frame.reason(),
        });
    }

    /// Records a locally sent GOAWAY. A graceful shutdown may later be
    /// tightened (lower last id or a real error), never loosened.
    pub fn send(&mut self, frame: &frame::GoAway, close_after_flush: bool) {
        if let Some(prev) = self.sent {
            debug_assert!(
                frame.last_stream_id() <= prev.last_stream_id,
                "GOAWAY last_stream_id must not rise"
            );
        }

        self.sent = Some(GoingAway {
            last_stream_id: frame.last_stream_id(),
            reason: frame.reason(),
        });
        self.close_now = self.close_now || close_after_flush;
    }

    pub fn is_going_away(&self) -> bool {
        self.sent.is_some() || self.received.is_some()
    }

    pub fn sent_last_stream_id(&self) -> Option<StreamId> {
        self.sent.map(|g| g.last_stream_id)
    }

    pub fn received_last_stream_id(&self) -> Option<StreamId> {
        self.received.map(|g| g.last_stream_id)
    }

    pub fn received_reason(&self) -> Option<Reason> {
        self.received.map(|g| g.reason)
    }

    /// Whether we may still initiate a stream toward the peer.
    pub fn allows_new_local_stream(&self, id: StreamId) -> bool {
        match self.received {
            Some(g) => id <= g.last_stream_id,
            None => true,
        }
    }

    /// Whether an incoming peer-initiated stream is still admissible after we
    /// signaled shutdown.
    pub fn allows_new_remote_stream(&self, id: StreamId) -> bool {
        match self.sent {
            Some(g) => id <= g.last_stream_id,
            None => true,
        }
    }

    pub fn should_close_now(&self) -> bool {
        self.close_now
    }
}
