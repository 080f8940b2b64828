use crate::error::UserError;
use crate::frame::{self, Settings};
use crate::proto::go_away::GoAway;
use crate::proto::streams::{RecvFlow, Role, SendFlow, Streams};

/// Connection-scoped protocol state: the stream table, both connection-level
/// flow windows, SETTINGS negotiation, GOAWAY tracking and the user PING slot.
#[derive(Debug)]
pub struct ConnectionState {
    pub streams: Streams,
    pub send_flow: SendFlow,
    pub recv_flow: RecvFlow,
    pub go_away: GoAway,

    /// Local settings the peer has acknowledged.
    acked_local_settings: Settings,
    /// Local settings sent but not yet acknowledged. Their effects on our own
    /// decoder and windows apply once the ACK arrives.
    pending_local_settings: Option<Settings>,
    /// The peer's most recent settings, applied on receipt.
    remote_settings: Settings,

    pending_user_ping: Option<frame::PingPayload>,
}

impl ConnectionState {
    pub fn new(role: Role, send_window: i32, recv_window: u32, ratio: f64) -> ConnectionState {
        ConnectionState {
            streams: Streams::new(role, send_window, recv_window, ratio),
            send_flow: SendFlow::new(send_window),
            recv_flow: RecvFlow::new(recv_window, ratio),
            go_away: GoAway::new(),
            acked_local_settings: Settings::default(),
            pending_local_settings: None,
            remote_settings: Settings::default(),
            pending_user_ping: None,
        }
    }

    pub fn local_settings(&self) -> &Settings {
        &self.acked_local_settings
    }

    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// Registers locally sent SETTINGS. Only one frame may be in flight.
    pub fn settings_sent(&mut self, settings: Settings) -> Result<(), UserError> {
        if self.pending_local_settings.is_some() {
            return Err(UserError::SendSettingsWhilePending);
        }
        self.pending_local_settings = Some(settings);
        Ok(())
    }

    pub fn has_pending_local_settings(&self) -> bool {
        self.pending_local_settings.is_some()
    }

    /// The peer acknowledged our last SETTINGS; returns them so the codec can
    /// apply their local effects.
    pub fn settings_acked(&mut self) -> Option<Settings> {
        let settings = self.pending_local_settings.take()?;
        self.merge_acked(&settings);
        Some(settings)
    }

    fn merge_acked(&mut self, settings: &Settings) {
        if let Some(v) = settings.header_table_size() {
            self.acked_local_settings.set_header_table_size(Some(v));
        }
        if let Some(v) = settings.initial_window_size() {
            self.acked_local_settings.set_initial_window_size(Some(v));
        }
        if let Some(v) = settings.max_frame_size() {
            self.acked_local_settings.set_max_frame_size(Some(v));
        }
        if let Some(v) = settings.max_concurrent_streams() {
            self.acked_local_settings.set_max_concurrent_streams(Some(v));
        }
        if let Some(v) = settings.max_header_list_size() {
            self.acked_local_settings.set_max_header_list_size(Some(v));
        }
        if let Some(v) = settings.is_push_enabled() {
            self.acked_local_settings.set_enable_push(v);
        }
    }

    /// Records the peer's settings frame; effects are applied by the codec as
    /// the frame is processed.
    pub fn update_remote_settings(&mut self, settings: &Settings) {
        if let Some(v) = settings.header_table_size() {
            self.remote_settings.set_header_table_size(Some(v));
        }
        if let Some(v) = settings.initial_window_size() {
            self.remote_settings.set_initial_window_size(Some(v));
        }
        if let Some(v) = settings.max_frame_size() {
            self.remote_settings.set_max_frame_size(Some(v));
        }
        if let Some(v) = settings.max_concurrent_streams() {
            self.remote_settings.set_max_concurrent_streams(Some(v));
        }
        if let Some(v) = settings.max_header_list_size() {
            self.remote_settings.set_max_header_list_size(Some(v));
        }
        if let Some(v) = settings.is_push_enabled() {
            self.remote_settings.set_enable_push(v);
        }
    }

    /// Registers a user PING in flight. One at a time.
    pub fn user_ping_sent(&mut self, payload: frame::PingPayload) -> Result<(), UserError> {
        if self.pending_user_ping.is_some() {
            return Err(UserError::SendPingWhilePending);
        }
        self.pending_user_ping = Some(payload);
        Ok(())
    }

    /// Matches a PING ACK against the pending user ping. A mismatched payload
    /// is reported (and logged by the caller) but clears nothing.
    pub fn user_pong_received(&mut self, payload: &frame::PingPayload) -> bool {
        match self.pending_user_ping {
            Some(expected) if expected == *payload => {
                self.pending_user_ping = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ConnectionState {
        ConnectionState::new(Role::Client, 65_535, 65_535, 0.5)
    }

    #[test]
    fn only_one_settings_in_flight() {
        let mut state = state();
        let mut settings = Settings::default();
        settings.set_max_frame_size(Some(32_768));

        state.settings_sent(settings.clone()).unwrap();
        assert_eq!(
            state.settings_sent(settings.clone()),
            Err(UserError::SendSettingsWhilePending)
        );

        let acked = state.settings_acked().unwrap();
        assert_eq!(acked.max_frame_size(), Some(32_768));
        assert_eq!(state.local_settings().max_frame_size(), Some(32_768));

        // A new frame may go out after the ACK.
        assert!(state.settings_sent(settings).is_ok());
    }

    #[test]
    fn unexpected_ack_is_ignored() {
        let mut state = state();
        assert!(state.settings_acked().is_none());
    }

    #[test]
    fn ping_payload_matching() {
        let mut state = state();
        state.user_ping_sent(*b"12345678").unwrap();
        assert_eq!(
            state.user_ping_sent(*b"12345678"),
            Err(UserError::SendPingWhilePending)
        );

        // Wrong payload does not clear the slot.
        assert!(!state.user_pong_received(b"87654321"));
        assert!(state.user_pong_received(b"12345678"));

        // Cleared; next pong has nothing to match.
        assert!(!state.user_pong_received(b"12345678"));
    }

    #[test]
    fn remote_settings_merge() {
        let mut state = state();
        let mut first = Settings::default();
        first.set_header_table_size(Some(8192));
        state.update_remote_settings(&first);

        let mut second = Settings::default();
        second.set_initial_window_size(Some(1024));
        state.update_remote_settings(&second);

        assert_eq!(state.remote_settings().header_table_size(), Some(8192));
        assert_eq!(state.remote_settings().initial_window_size(), Some(1024));
    }
}
