// Settings management and persistence
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::playback::RepeatMode;

/// Playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub volume: f32, // 0.0 - 1.0
    pub speed: f32,  // 0.25 - 4.0
    pub muted: bool,
    pub repeat: RepeatMode,
    pub shuffle: bool,
    pub resume_last_session: bool,
    pub position_sync_interval_ms: u64,
    pub max_consecutive_failures: u32,
    pub seek_retry_attempts: u32,
    pub seek_retry_delay_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            speed: 1.0,
            muted: false,
            repeat: RepeatMode::Off,
            shuffle: false,
            resume_last_session: true,
            position_sync_interval_ms: 250,
            max_consecutive_failures: 3,
            seek_retry_attempts: 10,
            seek_retry_delay_ms: 20,
        }
    }
}

/// Output device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Open the device at the track's native rate instead of the mixer rate
    pub exclusive_mode: bool,
    pub exclusive_init_attempts: u32,
    pub buffer_ms: u32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            exclusive_mode: false,
            exclusive_init_attempts: 3,
            buffer_ms: 250,
        }
    }
}

/// Lyric settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LyricSettings {
    pub load_sidecar_lrc: bool,
    pub offset_ms: i64,
}

impl Default for LyricSettings {
    fn default() -> Self {
        Self {
            load_sidecar_lrc: true,
            offset_ms: 0,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub version: i32, // Settings schema version for future migrations
    pub playback: PlaybackSettings,
    pub output: OutputSettings,
    pub lyrics: LyricSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: 1,
            playback: PlaybackSettings::default(),
            output: OutputSettings::default(),
            lyrics: LyricSettings::default(),
        }
    }
}

impl AppSettings {
    /// Get the settings file path
    pub fn get_settings_path(app_dir: &Path) -> PathBuf {
        app_dir.join("settings.json")
    }

    /// Load settings from file, or return defaults if file doesn't exist
    pub fn load(app_dir: &Path) -> Result<Self> {
        let path = Self::get_settings_path(app_dir);

        if !path.exists() {
            tracing::info!("No settings file found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;

        let settings: AppSettings = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings {:?}", path))?;

        tracing::info!(path = ?path, "Loaded settings");
        Ok(settings.sanitized())
    }

    /// Save settings to file
    pub fn save(&self, app_dir: &Path) -> Result<()> {
        // Ensure directory exists
        fs::create_dir_all(app_dir).context("Failed to create settings directory")?;

        let path = Self::get_settings_path(app_dir);
        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;

        fs::write(&path, content).with_context(|| format!("Failed to write settings file {:?}", path))?;

        tracing::debug!(path = ?path, "Saved settings");
        Ok(())
    }

    /// Clamp hand-edited values back into their valid ranges
    pub fn sanitized(mut self) -> Self {
        let p = &mut self.playback;
        p.volume = p.volume.clamp(0.0, 1.0);
        p.speed = p.speed.clamp(0.25, 4.0);
        p.position_sync_interval_ms = p.position_sync_interval_ms.max(10);
        p.max_consecutive_failures = p.max_consecutive_failures.max(1);
        p.seek_retry_attempts = p.seek_retry_attempts.max(1);
        self.output.exclusive_init_attempts = self.output.exclusive_init_attempts.max(1);
        self.output.buffer_ms = self.output.buffer_ms.clamp(20, 2000);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings::load(dir.path()).unwrap();
        assert_eq!(settings.playback.position_sync_interval_ms, 250);
        assert_eq!(settings.playback.max_consecutive_failures, 3);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = AppSettings::default();
        settings.playback.repeat = RepeatMode::All;
        settings.output.exclusive_mode = true;
        settings.save(dir.path()).unwrap();

        let loaded = AppSettings::load(dir.path()).unwrap();
        assert_eq!(loaded.playback.repeat, RepeatMode::All);
        assert!(loaded.output.exclusive_mode);
    }

    #[test]
    fn test_partial_file_fills_defaults_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            AppSettings::get_settings_path(dir.path()),
            r#"{ "playback": { "volume": 3.5, "speed": 0.0 } }"#,
        )
        .unwrap();

        let loaded = AppSettings::load(dir.path()).unwrap();
        assert_eq!(loaded.playback.volume, 1.0);
        assert_eq!(loaded.playback.speed, 0.25);
        assert_eq!(loaded.version, 1);
        assert!(loaded.lyrics.load_sidecar_lrc);
    }
}
