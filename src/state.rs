// Application context
// Everything the player needs from the environment, built once at startup
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::audio::AudioBackend;
use crate::db::DatabaseConnection;
use crate::metadata::LocalResolver;
use crate::playback::{spawn_player, EngineParts, PlayerHandle};
use crate::queue::{QueueSnapshot, SnapshotStore};
use crate::settings::AppSettings;
use crate::smtc::MediaSession;

const APP_DIR_NAME: &str = "melodeck";
const DB_FILE_NAME: &str = "melodeck.db";

pub struct AppContext {
    pub app_dir: PathBuf,
    pub settings: AppSettings,
    pub db: DatabaseConnection,
}

impl AppContext {
    /// Per-user data directory
    pub fn default_app_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .context("Failed to get app data directory")
    }

    pub fn load(app_dir: PathBuf) -> Result<Self> {
        let settings = AppSettings::load(&app_dir)?;
        let db = DatabaseConnection::new(app_dir.join(DB_FILE_NAME)).context("Failed to initialize database")?;
        Ok(Self { app_dir, settings, db })
    }

    /// The last saved session, when resuming is enabled and one exists
    pub fn saved_session(&self) -> Option<QueueSnapshot> {
        if !self.settings.playback.resume_last_session {
            return None;
        }
        match self.db.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load last session");
                None
            }
        }
    }

    pub fn engine_parts(&self, backend: Box<dyn AudioBackend>, media: Box<dyn MediaSession>) -> EngineParts {
        EngineParts {
            backend,
            resolver: Arc::new(LocalResolver {
                load_sidecar_lrc: self.settings.lyrics.load_sidecar_lrc,
                lyric_offset_ms: self.settings.lyrics.offset_ms,
            }),
            media,
            store: Some(Arc::new(self.db.clone())),
        }
    }

    /// Spawn the player task, optionally restoring the last session
    pub fn start_player(
        &self,
        backend: Box<dyn AudioBackend>,
        media: Box<dyn MediaSession>,
        resume: bool,
    ) -> PlayerHandle {
        let snapshot = if resume { self.saved_session() } else { None };
        spawn_player(self.engine_parts(backend, media), &self.settings.playback, snapshot)
    }
}
