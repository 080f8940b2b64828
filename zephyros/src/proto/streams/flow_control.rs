use std::fmt;

use crate::frame::Reason;
use crate::proto::{WindowSize, MAX_WINDOW_SIZE};

/// A signed flow-control window. Values live in [-2^31, 2^31 - 1]: settings
/// deltas may legally drive a window negative, but it can never grow past the
/// protocol maximum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Window(i32);

impl Window {
    pub fn new(size: i32) -> Window {
        Window(size)
    }

    /// The sendable/receivable size: a negative window exposes zero.
    pub fn available(&self) -> WindowSize {
        if self.0 < 0 {
            0
        } else {
            self.0 as WindowSize
        }
    }

    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The outbound budget for one scope (a stream, or the connection): how many
/// DATA octets we may still send. Grown by the peer's WINDOW_UPDATE frames,
/// shifted by its INITIAL_WINDOW_SIZE changes.
#[derive(Debug, Clone, Copy)]
pub struct SendFlow {
    window: Window,
}

impl SendFlow {
    pub fn new(size: i32) -> SendFlow {
        SendFlow {
            window: Window(size),
        }
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn available(&self) -> WindowSize {
        self.window.available()
    }

    /// Applies a WINDOW_UPDATE increment. Overflow past 2^31 - 1 violates the
    /// flow-control protocol.
    pub fn inc_window(&mut self, sz: WindowSize) -> Result<(), Reason> {
        let (val, overflowed) = self.window.0.overflowing_add(sz as i32);

        if overflowed || val > MAX_WINDOW_SIZE as i32 {
            return Err(Reason::FLOW_CONTROL_ERROR);
        }

        tracing::trace!("inc_window; sz={}; old={}; new={}", sz, self.window, val);
        self.window = Window(val);
        Ok(())
    }

    /// Applies an INITIAL_WINDOW_SIZE delta from the peer's SETTINGS. The
    /// window may go negative; overflow upward is still an error.
    pub fn apply_initial_delta(&mut self, delta: i32) -> Result<(), Reason> {
        let val = self
            .window
            .0
            .checked_add(delta)
            .ok_or(Reason::FLOW_CONTROL_ERROR)?;

        if val > MAX_WINDOW_SIZE as i32 {
            return Err(Reason::FLOW_CONTROL_ERROR);
        }

        tracing::trace!("apply_initial_delta; delta={}; new={}", delta, val);
        self.window = Window(val);
        Ok(())
    }

    pub fn send_data(&mut self, sz: WindowSize) {
        debug_assert!(sz <= self.available());
        tracing::trace!("send_data; sz={}; window={}", sz, self.window);
        self.window.0 -= sz as i32;
    }
}

/// The inbound accounting for one scope: how many octets the peer may still
/// send us, and how many delivered octets the application has consumed but we
/// have not yet returned with a WINDOW_UPDATE.
///
/// Updates are released in batches: once the pending amount reaches
/// `ratio × target window`, a WINDOW_UPDATE for the whole batch is due. This
/// balances peer throughput against per-frame update chatter.
#[derive(Debug, Clone, Copy)]
pub struct RecvFlow {
    window: Window,
    target: WindowSize,
    pending_release: WindowSize,
    outstanding: WindowSize,
    ratio: f64,
}

/// Consumption was signaled for more octets than were ever delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOverflow;

impl RecvFlow {
    pub fn new(size: WindowSize, ratio: f64) -> RecvFlow {
        debug_assert!(ratio > 0.0 && ratio <= 1.0);
        RecvFlow {
            window: Window(size as i32),
            target: size,
            pending_release: 0,
            outstanding: 0,
            ratio,
        }
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn available(&self) -> WindowSize {
        self.window.available()
    }

    /// Charges an arriving DATA frame (payload plus padding) against the
    /// window. Exceeding the advertised window violates flow control.
    pub fn recv_data(&mut self, sz: WindowSize) -> Result<(), Reason> {
        if sz > self.available() {
            tracing::debug!(
                "recv_data overflow; sz={}; available={}",
                sz,
                self.available()
            );
            return Err(Reason::FLOW_CONTROL_ERROR);
        }

        self.window.0 -= sz as i32;
        self.outstanding += sz;
        Ok(())
    }

    /// Records `sz` octets consumed by the application. Returns the increment
    /// to announce via WINDOW_UPDATE once the release threshold is reached.
    pub fn consume(&mut self, sz: WindowSize) -> Result<Option<WindowSize>, ConsumeOverflow> {
        if sz > self.outstanding {
            return Err(ConsumeOverflow);
        }

        self.outstanding -= sz;
        self.pending_release += sz;

        if (self.pending_release as f64) < self.ratio * self.target as f64 {
            return Ok(None);
        }

        let increment = self.pending_release;
        self.pending_release = 0;
        self.window.0 += increment as i32;

        tracing::trace!("release window; increment={}", increment);
        Ok(Some(increment))
    }

    /// Applies a local INITIAL_WINDOW_SIZE change (our SETTINGS): shifts both
    /// the live window and the release target.
    pub fn apply_initial_delta(&mut self, delta: i32) {
        self.window.0 += delta;
        self.target = (self.target as i64 + delta as i64).max(0) as WindowSize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_window_grows_by_exact_increment() {
        let mut flow = SendFlow::new(100);
        flow.inc_window(50).unwrap();
        assert_eq!(flow.available(), 150);
    }

    #[test]
    fn send_window_overflow_is_flow_control_error() {
        let mut flow = SendFlow::new(MAX_WINDOW_SIZE as i32);
        assert_eq!(flow.inc_window(1), Err(Reason::FLOW_CONTROL_ERROR));

        // 2^31 - 1 on a fresh window is the exact boundary and is legal.
        let mut flow = SendFlow::new(0);
        assert!(flow.inc_window(MAX_WINDOW_SIZE).is_ok());
        assert_eq!(flow.inc_window(1), Err(Reason::FLOW_CONTROL_ERROR));
    }

    #[test]
    fn initial_delta_may_go_negative() {
        let mut flow = SendFlow::new(10);
        flow.send_data(10);
        flow.apply_initial_delta(-5).unwrap();
        assert_eq!(flow.window().as_i32(), -5);
        assert_eq!(flow.available(), 0);

        // Recovers once updates arrive.
        flow.inc_window(6).unwrap();
        assert_eq!(flow.available(), 1);
    }

    #[test]
    fn window_update_is_commutative() {
        let mut a = SendFlow::new(0);
        a.inc_window(3).unwrap();
        a.inc_window(7).unwrap();

        let mut b = SendFlow::new(0);
        b.inc_window(7).unwrap();
        b.inc_window(3).unwrap();

        assert_eq!(a.available(), b.available());
    }

    #[test]
    fn recv_overflow_rejected() {
        let mut flow = RecvFlow::new(5, 0.5);
        flow.recv_data(5).unwrap();
        assert_eq!(flow.recv_data(1), Err(Reason::FLOW_CONTROL_ERROR));
    }

    #[test]
    fn consume_releases_at_ratio_threshold() {
        let mut flow = RecvFlow::new(100, 0.5);
        flow.recv_data(80).unwrap();

        assert_eq!(flow.consume(20), Ok(None));
        assert_eq!(flow.consume(29), Ok(None));
        // Crossing half the window releases everything pending.
        assert_eq!(flow.consume(1), Ok(Some(50)));
        assert_eq!(flow.available(), 70);
    }

    #[test]
    fn ratio_one_releases_only_at_full_window() {
        let mut flow = RecvFlow::new(10, 1.0);
        flow.recv_data(10).unwrap();
        assert_eq!(flow.consume(9), Ok(None));
        assert_eq!(flow.consume(1), Ok(Some(10)));
    }

    #[test]
    fn consuming_more_than_delivered_is_an_error() {
        let mut flow = RecvFlow::new(100, 0.5);
        flow.recv_data(10).unwrap();
        assert_eq!(flow.consume(11), Err(ConsumeOverflow));
        assert_eq!(flow.consume(10), Ok(None));
    }
}
