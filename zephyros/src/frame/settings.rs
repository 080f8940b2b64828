use bytes::BufMut;
use std::fmt;

use crate::frame::{util, Error, Frame, Head, Kind, StreamId};

pub const DEFAULT_SETTINGS_HEADER_TABLE_SIZE: usize = 4_096;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_INITIAL_WINDOW_SIZE: usize = (1 << 31) - 1;
pub const MAX_MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

/// A SETTINGS frame: the sender's advertised configuration, or an empty ACK.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Settings {
    flags: SettingsFlags,
    header_table_size: Option<u32>,
    enable_push: Option<u32>,
    max_concurrent_streams: Option<u32>,
    initial_window_size: Option<u32>,
    max_frame_size: Option<u32>,
    max_header_list_size: Option<u32>,
}

/// An individual (identifier, value) setting entry.
#[derive(Debug)]
pub enum Setting {
    HeaderTableSize(u32),
    EnablePush(u32),
    MaxConcurrentStreams(u32),
    InitialWindowSize(u32),
    MaxFrameSize(u32),
    MaxHeaderListSize(u32),
}

#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct SettingsFlags(u8);

const ACK: u8 = 0x1;

impl Settings {
    pub fn ack() -> Settings {
        Settings {
            flags: SettingsFlags::ack(),
            ..Settings::default()
        }
    }

    pub fn is_ack(&self) -> bool {
        self.flags.is_ack()
    }

    pub fn initial_window_size(&self) -> Option<u32> {
        self.initial_window_size
    }

    pub fn set_initial_window_size(&mut self, size: Option<u32>) {
        self.initial_window_size = size;
    }

    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent_streams = max;
    }

    pub fn max_frame_size(&self) -> Option<u32> {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, size: Option<u32>) {
        if let Some(val) = size {
            assert!(DEFAULT_MAX_FRAME_SIZE <= val && val <= MAX_MAX_FRAME_SIZE);
        }
        self.max_frame_size = size;
    }

    pub fn max_header_list_size(&self) -> Option<u32> {
        self.max_header_list_size
    }

    pub fn set_max_header_list_size(&mut self, size: Option<u32>) {
        self.max_header_list_size = size;
    }

    pub fn is_push_enabled(&self) -> Option<bool> {
        self.enable_push.map(|val| val != 0)
    }

    pub fn set_enable_push(&mut self, enable: bool) {
        self.enable_push = Some(enable as u32);
    }

    pub fn header_table_size(&self) -> Option<u32> {
        self.header_table_size
    }

    pub fn set_header_table_size(&mut self, size: Option<u32>) {
        self.header_table_size = size;
    }

    pub(crate) fn load(head: Head, payload: &[u8]) -> Result<Settings, Error> {
        debug_assert_eq!(head.kind(), Kind::Settings);

        if !head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        // An ACK carries no payload.
        if head.flag() & ACK != 0 {
            if !payload.is_empty() {
                tracing::debug!("invalid settings; ACK with non-empty payload");
                return Err(Error::InvalidPayloadAckSettings);
            }

            return Ok(Settings::ack());
        }

        if payload.len() % 6 != 0 {
            tracing::debug!("invalid settings; payload not a multiple of 6");
            return Err(Error::BadFrameSize);
        }

        let mut settings = Settings::default();

        for raw in payload.chunks(6) {
            match Setting::load(raw) {
                Some(Setting::HeaderTableSize(val)) => {
                    settings.header_table_size = Some(val);
                }
                Some(Setting::EnablePush(val)) => match val {
                    0 | 1 => {
                        settings.enable_push = Some(val);
                    }
                    _ => {
                        return Err(Error::InvalidSettingValue);
                    }
                },
                Some(Setting::MaxConcurrentStreams(val)) => {
                    settings.max_concurrent_streams = Some(val);
                }
                Some(Setting::InitialWindowSize(val)) => {
                    if val as usize > MAX_INITIAL_WINDOW_SIZE {
                        return Err(Error::InvalidInitialWindowSize);
                    }
                    settings.initial_window_size = Some(val);
                }
                Some(Setting::MaxFrameSize(val)) => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&val) {
                        return Err(Error::InvalidSettingValue);
                    }
                    settings.max_frame_size = Some(val);
                }
                Some(Setting::MaxHeaderListSize(val)) => {
                    settings.max_header_list_size = Some(val);
                }
                // Unknown settings identifiers are ignored.
                None => {}
            }
        }

        Ok(settings)
    }

    pub(crate) fn encode<B: BufMut>(&self, dst: &mut B) {
        let head = Head::new(Kind::Settings, self.flags.into(), StreamId::ZERO);
        let payload_len = self.payload_len();

        tracing::trace!("encoding SETTINGS; len={}", payload_len);

        head.encode(payload_len, dst);

        self.for_each(|setting| {
            tracing::trace!("encoding setting; val={:?}", setting);
            setting.encode(dst)
        });
    }

    fn payload_len(&self) -> usize {
        let mut len = 0;
        self.for_each(|_| len += 6);
        len
    }

    fn for_each<F: FnMut(Setting)>(&self, mut f: F) {
        if let Some(v) = self.header_table_size {
            f(Setting::HeaderTableSize(v));
        }
        if let Some(v) = self.enable_push {
            f(Setting::EnablePush(v));
        }
        if let Some(v) = self.max_concurrent_streams {
            f(Setting::MaxConcurrentStreams(v));
        }
        if let Some(v) = self.initial_window_size {
            f(Setting::InitialWindowSize(v));
        }
        if let Some(v) = self.max_frame_size {
            f(Setting::MaxFrameSize(v));
        }
        if let Some(v) = self.max_header_list_size {
            f(Setting::MaxHeaderListSize(v));
        }
    }
}

impl From<Settings> for Frame {
    fn from(src: Settings) -> Frame {
        Frame::Settings(src)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = fmt.debug_struct("Settings");
        builder.field("flags", &self.flags);

        self.for_each(|setting| match setting {
            Setting::EnablePush(v) => {
                builder.field("enable_push", &v);
            }
            Setting::HeaderTableSize(v) => {
                builder.field("header_table_size", &v);
            }
            Setting::InitialWindowSize(v) => {
                builder.field("initial_window_size", &v);
            }
            Setting::MaxConcurrentStreams(v) => {
                builder.field("max_concurrent_streams", &v);
            }
            Setting::MaxFrameSize(v) => {
                builder.field("max_frame_size", &v);
            }
            Setting::MaxHeaderListSize(v) => {
                builder.field("max_header_list_size", &v);
            }
        });

        builder.finish()
    }
}

impl Setting {
    /// Creates a `Setting` from an identifier and value, or `None` for
    /// identifiers this implementation does not know.
    pub fn from_id(id: u16, val: u32) -> Option<Setting> {
        use self::Setting::*;

        match id {
            1 => Some(HeaderTableSize(val)),
            2 => Some(EnablePush(val)),
            3 => Some(MaxConcurrentStreams(val)),
            4 => Some(InitialWindowSize(val)),
            5 => Some(MaxFrameSize(val)),
            6 => Some(MaxHeaderListSize(val)),
            _ => None,
        }
    }

    fn load(raw: &[u8]) -> Option<Setting> {
        debug_assert_eq!(raw.len(), 6);

        let id = (raw[0] as u16) << 8 | raw[1] as u16;
        let val = util::unpack_u32(raw, 2);

        Setting::from_id(id, val)
    }

    fn encode<B: BufMut>(&self, dst: &mut B) {
        use self::Setting::*;

        let (kind, val) = match *self {
            HeaderTableSize(v) => (1, v),
            EnablePush(v) => (2, v),
            MaxConcurrentStreams(v) => (3, v),
            InitialWindowSize(v) => (4, v),
            MaxFrameSize(v) => (5, v),
            MaxHeaderListSize(v) => (6, v),
        };

        dst.put_u16(kind);
        dst.put_u32(val);
    }
}

impl SettingsFlags {
    pub fn ack() -> SettingsFlags {
        SettingsFlags(ACK)
    }

    pub fn is_ack(&self) -> bool {
        self.0 & ACK == ACK
    }
}

impl From<SettingsFlags> for u8 {
    fn from(src: SettingsFlags) -> u8 {
        src.0
    }
}

impl fmt::Debug for SettingsFlags {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        util::fmt_flags(fmt, self.0, &[(self.is_ack(), "ACK")])
    }
}
