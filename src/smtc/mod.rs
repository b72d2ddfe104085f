// Media session bridge
// Mirrors playback state to the OS media overlay and forwards its buttons

use crate::playback::PlayState;

#[cfg(windows)]
mod windows_smtc;

#[cfg(windows)]
pub use windows_smtc::SmtcManager;

/// Button events from the OS media overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtcButton {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
}

pub type ButtonCallback = Box<dyn Fn(SmtcButton) + Send + Sync + 'static>;

/// What the overlay shows for the current track
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: Option<u64>,
    /// Encoded cover image (JPEG/PNG) for the overlay thumbnail
    pub cover: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonsEnabled {
    pub previous: bool,
    pub next: bool,
    pub play: bool,
    pub pause: bool,
}

/// OS media session surface driven by the playback engine
pub trait MediaSession: Send + 'static {
    fn update_media_info(&self, info: &MediaInfo) -> Result<(), String>;
    fn update_playback_status(&self, state: PlayState) -> Result<(), String>;
    fn update_timeline(&self, position_ms: u64, duration_ms: u64) -> Result<(), String>;
    fn set_buttons_enabled(&self, buttons: ButtonsEnabled) -> Result<(), String>;
    fn set_button_callback(&self, callback: ButtonCallback) -> Result<(), String>;
}

/// Session that shows nothing, for headless runs
#[derive(Debug, Default)]
pub struct NullMediaSession;

impl MediaSession for NullMediaSession {
    fn update_media_info(&self, _info: &MediaInfo) -> Result<(), String> {
        Ok(())
    }

    fn update_playback_status(&self, _state: PlayState) -> Result<(), String> {
        Ok(())
    }

    fn update_timeline(&self, _position_ms: u64, _duration_ms: u64) -> Result<(), String> {
        Ok(())
    }

    fn set_buttons_enabled(&self, _buttons: ButtonsEnabled) -> Result<(), String> {
        Ok(())
    }

    fn set_button_callback(&self, _callback: ButtonCallback) -> Result<(), String> {
        Ok(())
    }
}

// Stub for non-Windows platforms
#[cfg(not(windows))]
mod stub {
    use super::{ButtonCallback, ButtonsEnabled, MediaInfo, MediaSession};
    use crate::playback::PlayState;

    pub struct SmtcManager;

    impl SmtcManager {
        pub fn new() -> Result<Self, String> {
            tracing::debug!("No system media controls on this platform");
            Ok(Self)
        }
    }

    impl MediaSession for SmtcManager {
        fn update_media_info(&self, info: &MediaInfo) -> Result<(), String> {
            tracing::trace!(title = %info.title, "media info");
            Ok(())
        }

        fn update_playback_status(&self, _state: PlayState) -> Result<(), String> {
            Ok(())
        }

        fn update_timeline(&self, _position_ms: u64, _duration_ms: u64) -> Result<(), String> {
            Ok(())
        }

        fn set_buttons_enabled(&self, _buttons: ButtonsEnabled) -> Result<(), String> {
            Ok(())
        }

        fn set_button_callback(&self, _callback: ButtonCallback) -> Result<(), String> {
            Ok(())
        }
    }
}

#[cfg(not(windows))]
pub use stub::SmtcManager;
