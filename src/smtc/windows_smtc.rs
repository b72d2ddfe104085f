// Windows SMTC implementation using windows-rs crate

use std::sync::{Arc, Mutex};
use windows::core::HSTRING;
use windows::Foundation::{TimeSpan, TypedEventHandler};
use windows::Media::Playback::MediaPlayer;
use windows::Media::{
    MediaPlaybackStatus, MediaPlaybackType, SystemMediaTransportControls,
    SystemMediaTransportControlsButton, SystemMediaTransportControlsButtonPressedEventArgs,
    SystemMediaTransportControlsTimelineProperties,
};
use windows::Storage::Streams::{DataWriter, InMemoryRandomAccessStream, RandomAccessStreamReference};

use super::{ButtonCallback, ButtonsEnabled, MediaInfo, MediaSession, SmtcButton};
use crate::playback::PlayState;

type SharedCallback = Arc<Mutex<Option<ButtonCallback>>>;

/// Manager for Windows System Media Transport Controls
pub struct SmtcManager {
    // Owns the SMTC instance; dropping it detaches the overlay
    _media_player: MediaPlayer,
    smtc: SystemMediaTransportControls,
    button_callback: SharedCallback,
}

fn time_span(ms: u64) -> TimeSpan {
    // 100 ns ticks
    TimeSpan { Duration: ms as i64 * 10_000 }
}

/// Wrap encoded image bytes in a stream the overlay can read
fn thumbnail(bytes: &[u8]) -> windows::core::Result<RandomAccessStreamReference> {
    let stream = InMemoryRandomAccessStream::new()?;
    let writer = DataWriter::CreateDataWriter(&stream)?;
    writer.WriteBytes(bytes)?;
    writer.StoreAsync()?.get()?;
    writer.DetachStream()?;
    stream.Seek(0)?;
    RandomAccessStreamReference::CreateFromStream(&stream)
}

impl SmtcManager {
    pub fn new() -> Result<Self, String> {
        let media_player = MediaPlayer::new()
            .map_err(|e| format!("Failed to create MediaPlayer: {}", e))?;

        // We drive the overlay ourselves rather than through MediaPlayer playback
        media_player
            .CommandManager()
            .map_err(|e| format!("Failed to get CommandManager: {}", e))?
            .SetIsEnabled(false)
            .map_err(|e| format!("Failed to disable CommandManager: {}", e))?;

        let smtc = media_player
            .SystemMediaTransportControls()
            .map_err(|e| format!("Failed to get SMTC: {}", e))?;

        smtc.SetIsEnabled(true)
            .map_err(|e| format!("Failed to enable SMTC: {}", e))?;
        smtc.SetIsStopEnabled(true)
            .map_err(|e| format!("Failed to enable stop button: {}", e))?;

        let button_callback: SharedCallback = Arc::new(Mutex::new(None));

        let callback_clone = button_callback.clone();
        let handler = TypedEventHandler::new(
            move |_sender: &Option<SystemMediaTransportControls>,
                  args: &Option<SystemMediaTransportControlsButtonPressedEventArgs>| {
                let Some(button) = args.as_ref().and_then(|a| a.Button().ok()) else {
                    return Ok(());
                };
                let button = match button {
                    SystemMediaTransportControlsButton::Play => SmtcButton::Play,
                    SystemMediaTransportControlsButton::Pause => SmtcButton::Pause,
                    SystemMediaTransportControlsButton::Stop => SmtcButton::Stop,
                    SystemMediaTransportControlsButton::Next => SmtcButton::Next,
                    SystemMediaTransportControlsButton::Previous => SmtcButton::Previous,
                    _ => return Ok(()),
                };
                if let Ok(guard) = callback_clone.lock() {
                    if let Some(cb) = guard.as_ref() {
                        cb(button);
                    }
                }
                Ok(())
            },
        );

        smtc.ButtonPressed(&handler)
            .map_err(|e| format!("Failed to register button handler: {}", e))?;

        tracing::info!("System media transport controls initialized");

        Ok(Self {
            _media_player: media_player,
            smtc,
            button_callback,
        })
    }
}

impl MediaSession for SmtcManager {
    fn update_media_info(&self, info: &MediaInfo) -> Result<(), String> {
        let updater = self
            .smtc
            .DisplayUpdater()
            .map_err(|e| format!("Failed to get display updater: {}", e))?;

        // Drops the previous track's thumbnail too
        updater
            .ClearAll()
            .map_err(|e| format!("Failed to clear display: {}", e))?;
        updater
            .SetType(MediaPlaybackType::Music)
            .map_err(|e| format!("Failed to set type: {}", e))?;

        let music_props = updater
            .MusicProperties()
            .map_err(|e| format!("Failed to get music properties: {}", e))?;

        music_props
            .SetTitle(&HSTRING::from(info.title.as_str()))
            .map_err(|e| format!("Failed to set title: {}", e))?;
        music_props
            .SetArtist(&HSTRING::from(info.artist.as_str()))
            .map_err(|e| format!("Failed to set artist: {}", e))?;
        if let Some(album) = info.album.as_deref() {
            music_props
                .SetAlbumTitle(&HSTRING::from(album))
                .map_err(|e| format!("Failed to set album: {}", e))?;
        }

        if let Some(cover) = info.cover.as_deref() {
            match thumbnail(cover) {
                Ok(reference) => updater
                    .SetThumbnail(&reference)
                    .map_err(|e| format!("Failed to set thumbnail: {}", e))?,
                Err(e) => tracing::debug!(error = %e, "cover art not usable as thumbnail"),
            }
        }

        updater
            .Update()
            .map_err(|e| format!("Failed to update display: {}", e))?;

        if let Some(duration_ms) = info.duration_ms {
            self.update_timeline(0, duration_ms)?;
        }
        Ok(())
    }

    fn update_playback_status(&self, state: PlayState) -> Result<(), String> {
        let status = match state {
            PlayState::Stopped => MediaPlaybackStatus::Stopped,
            PlayState::Loading => MediaPlaybackStatus::Changing,
            PlayState::Playing => MediaPlaybackStatus::Playing,
            PlayState::Paused => MediaPlaybackStatus::Paused,
        };

        self.smtc
            .SetPlaybackStatus(status)
            .map_err(|e| format!("Failed to set playback status: {}", e))
    }

    fn update_timeline(&self, position_ms: u64, duration_ms: u64) -> Result<(), String> {
        let props = SystemMediaTransportControlsTimelineProperties::new()
            .map_err(|e| format!("Failed to create timeline properties: {}", e))?;

        let end = time_span(duration_ms);
        let set = || -> windows::core::Result<()> {
            props.SetStartTime(time_span(0))?;
            props.SetMinSeekTime(time_span(0))?;
            props.SetEndTime(end)?;
            props.SetMaxSeekTime(end)?;
            props.SetPosition(time_span(position_ms.min(duration_ms)))?;
            Ok(())
        };
        set().map_err(|e| format!("Failed to fill timeline: {}", e))?;

        self.smtc
            .UpdateTimelineProperties(&props)
            .map_err(|e| format!("Failed to update timeline: {}", e))
    }

    fn set_buttons_enabled(&self, buttons: ButtonsEnabled) -> Result<(), String> {
        self.smtc
            .SetIsPreviousEnabled(buttons.previous)
            .map_err(|e| format!("Failed to toggle previous button: {}", e))?;
        self.smtc
            .SetIsNextEnabled(buttons.next)
            .map_err(|e| format!("Failed to toggle next button: {}", e))?;
        self.smtc
            .SetIsPlayEnabled(buttons.play)
            .map_err(|e| format!("Failed to toggle play button: {}", e))?;
        self.smtc
            .SetIsPauseEnabled(buttons.pause)
            .map_err(|e| format!("Failed to toggle pause button: {}", e))
    }

    fn set_button_callback(&self, callback: ButtonCallback) -> Result<(), String> {
        let mut guard = self
            .button_callback
            .lock()
            .map_err(|e| format!("Failed to lock callback: {}", e))?;
        *guard = Some(callback);
        Ok(())
    }
}

// The WinRT objects are agile; the manager is only touched from the player task
unsafe impl Send for SmtcManager {}
unsafe impl Sync for SmtcManager {}
