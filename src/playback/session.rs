// Playback session state
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::queue::QueueEntry;
use crate::track::TrackDetail;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    /// No stream exists
    Stopped,
    /// Resolving the next track; no stream yet
    Loading,
    Playing,
    /// Stream is kept alive but not advancing
    Paused,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

impl RepeatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::All => "all",
            RepeatMode::One => "one",
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(RepeatMode::Off),
            "all" | "queue" => Ok(RepeatMode::All),
            "one" | "track" => Ok(RepeatMode::One),
            other => Err(format!("unknown repeat mode '{}'", other)),
        }
    }
}

/// Everything the engine knows about what is playing right now
#[derive(Debug, Clone)]
pub struct Session {
    pub state: PlayState,
    /// Queue entry being played or loaded
    pub entry: Option<QueueEntry>,
    /// Lazily resolved details of `entry`
    pub detail: Option<TrackDetail>,
    pub repeat: RepeatMode,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub volume: f32,
    pub muted: bool,
    pub speed: f32,
    pub lyric_index: Option<usize>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: PlayState::Stopped,
            entry: None,
            detail: None,
            repeat: RepeatMode::Off,
            position_ms: 0,
            duration_ms: 0,
            volume: 1.0,
            muted: false,
            speed: 1.0,
            lyric_index: None,
        }
    }
}

impl Session {
    /// Volume actually sent to the backend
    pub fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    /// Forget the current track and its timeline
    pub fn zero(&mut self) {
        self.state = PlayState::Stopped;
        self.entry = None;
        self.detail = None;
        self.position_ms = 0;
        self.duration_ms = 0;
        self.lyric_index = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_mode_parse() {
        assert_eq!("ALL".parse::<RepeatMode>().unwrap(), RepeatMode::All);
        assert_eq!("one".parse::<RepeatMode>().unwrap(), RepeatMode::One);
        assert!("sometimes".parse::<RepeatMode>().is_err());
        assert_eq!(serde_json::to_string(&RepeatMode::All).unwrap(), "\"all\"");
    }

    #[test]
    fn test_muted_volume_is_zero() {
        let mut session = Session { volume: 0.6, ..Default::default() };
        assert_eq!(session.effective_volume(), 0.6);
        session.muted = true;
        assert_eq!(session.effective_volume(), 0.0);
    }
}
