// Track references and resolved track details
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::lyrics::Lyrics;

/// Lightweight reference to something the queue can play.
///
/// References are immutable once created and carry no playback state.
/// Everything needed to actually play them is resolved lazily into a
/// [`TrackDetail`] when playback starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackRef {
    /// A file on local disk
    Local { path: PathBuf },
    /// A location nobody has classified yet (playlist entry, dropped URL)
    Unknown { url: String },
    /// An entry from an online catalog
    Online(OnlineTrack),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineTrack {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration_ms: Option<u64>,
    /// False when the catalog reports the track as not streamable
    pub playable: bool,
    /// Locally cached copy, if one has been downloaded
    pub cached_path: Option<PathBuf>,
}

impl TrackRef {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        TrackRef::Local { path: path.into() }
    }

    pub fn unknown(url: impl Into<String>) -> Self {
        TrackRef::Unknown { url: url.into() }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, TrackRef::Online(_))
    }

    /// Whether this reference is worth trying to resolve at all
    pub fn is_playable(&self) -> bool {
        match self {
            TrackRef::Local { .. } | TrackRef::Unknown { .. } => true,
            TrackRef::Online(track) => track.playable,
        }
    }

    /// Best-effort title for logs and placeholders before resolution
    pub fn display_title(&self) -> String {
        match self {
            TrackRef::Local { path } => file_stem_title(path),
            TrackRef::Unknown { url } => url
                .rsplit(|c: char| c == '/' || c == '\\')
                .find(|s| !s.is_empty())
                .unwrap_or(url.as_str())
                .to_string(),
            TrackRef::Online(track) => track.title.clone(),
        }
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackRef::Local { path } => write!(f, "local:{}", path.display()),
            TrackRef::Unknown { url } => write!(f, "unknown:{}", url),
            TrackRef::Online(track) => write!(f, "online:{}", track.id),
        }
    }
}

pub(crate) fn file_stem_title(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .to_string()
}

/// Where the backend reads audio from
#[derive(Debug, Clone)]
pub enum StreamSource {
    File(PathBuf),
    Bytes(Arc<[u8]>),
}

/// Fully resolved, playable metadata for one track
#[derive(Debug, Clone)]
pub struct TrackDetail {
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration_ms: Option<u64>,
    pub source: StreamSource,
    pub cover: Option<Vec<u8>>,
    pub lyrics: Option<Lyrics>,
}

impl TrackDetail {
    /// Artists joined the way media overlays display them
    pub fn artist_line(&self) -> String {
        self.artists.join(" / ")
    }
}
