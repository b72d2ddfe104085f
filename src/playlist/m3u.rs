// M3U / M3U8 playlists
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::track::TrackRef;

#[derive(Debug, Clone, PartialEq)]
pub struct M3uEntry {
    pub track: TrackRef,
    /// Display title from `#EXTINF`
    pub title: Option<String>,
    /// Length in seconds from `#EXTINF`; -1 means unknown
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct M3uPlaylist {
    pub name: String,
    pub entries: Vec<M3uEntry>,
}

impl M3uPlaylist {
    /// Parse playlist text. Relative paths are resolved against `base_dir`.
    pub fn parse(content: &str, base_dir: &Path) -> Self {
        let mut playlist = M3uPlaylist::default();
        let mut pending_info: Option<(Option<i64>, Option<String>)> = None;

        // Strip a UTF-8 BOM some editors add
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(info) = line.strip_prefix("#EXTINF:") {
                pending_info = Some(parse_extinf(info));
                continue;
            }
            if let Some(name) = line.strip_prefix("#PLAYLIST:") {
                playlist.name = name.trim().to_string();
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            let (duration_secs, title) = pending_info.take().unwrap_or((None, None));
            playlist.entries.push(M3uEntry {
                track: location_to_track(line, base_dir),
                title,
                duration_secs,
            });
        }

        playlist
    }

    /// Read a playlist file. `.m3u` files that aren't valid UTF-8 are decoded lossily.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("Failed to read playlist {:?}", path))?;
        let content = String::from_utf8_lossy(&bytes);
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut playlist = Self::parse(&content, base_dir);
        if playlist.name.is_empty() {
            playlist.name = crate::track::file_stem_title(path);
        }
        tracing::debug!(path = ?path, entries = playlist.entries.len(), "Read playlist");
        Ok(playlist)
    }

    pub fn tracks(&self) -> Vec<TrackRef> {
        self.entries.iter().map(|e| e.track.clone()).collect()
    }

    /// Build a playlist from queue contents. Online tracks without a local
    /// copy have no location to write and are left out.
    pub fn from_tracks(name: impl Into<String>, tracks: &[TrackRef]) -> Self {
        let entries = tracks
            .iter()
            .filter_map(|track| {
                let (title, duration_secs) = match track {
                    TrackRef::Online(t) => {
                        let cached = t.cached_path.as_ref()?;
                        let secs = t.duration_ms.map(|ms| (ms / 1000) as i64);
                        return Some(M3uEntry {
                            track: TrackRef::local(cached.clone()),
                            title: Some(format!("{} - {}", t.artists.join(", "), t.title)),
                            duration_secs: secs,
                        });
                    }
                    other => (Some(other.display_title()), None),
                };
                Some(M3uEntry { track: track.clone(), title, duration_secs })
            })
            .collect();

        Self { name: name.into(), entries }
    }

    /// Render as extended M3U (UTF-8, so suitable for `.m3u8`)
    pub fn to_m3u8(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        if !self.name.is_empty() {
            out.push_str(&format!("#PLAYLIST:{}\n", self.name));
        }
        for entry in &self.entries {
            let location = match &entry.track {
                TrackRef::Local { path } => path.to_string_lossy().into_owned(),
                TrackRef::Unknown { url } => url.clone(),
                TrackRef::Online(t) => match t.cached_path.as_ref() {
                    Some(path) => path.to_string_lossy().into_owned(),
                    None => continue,
                },
            };
            let title = entry.title.clone().unwrap_or_else(|| entry.track.display_title());
            out.push_str(&format!("#EXTINF:{},{}\n", entry.duration_secs.unwrap_or(-1), title));
            out.push_str(&location);
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_m3u8()).with_context(|| format!("Failed to write playlist {:?}", path))?;
        tracing::debug!(path = ?path, entries = self.entries.len(), "Wrote playlist");
        Ok(())
    }
}

/// `#EXTINF:<seconds>[ attributes],<title>`
fn parse_extinf(info: &str) -> (Option<i64>, Option<String>) {
    let (head, title) = match info.split_once(',') {
        Some((head, title)) => (head, Some(title.trim().to_string()).filter(|t| !t.is_empty())),
        None => (info, None),
    };
    let duration = head
        .split_whitespace()
        .next()
        .and_then(|d| d.parse::<f64>().ok())
        .map(|d| d as i64)
        .filter(|d| *d >= 0);
    (duration, title)
}

fn location_to_track(location: &str, base_dir: &Path) -> TrackRef {
    if let Some(rest) = location.strip_prefix("file://") {
        // file:///C:/x.mp3 on Windows, file:///home/x.mp3 elsewhere
        let rest = rest.replace("%20", " ");
        let path = match rest.strip_prefix('/') {
            Some(stripped) if stripped.as_bytes().get(1) == Some(&b':') => PathBuf::from(stripped),
            _ => PathBuf::from(rest),
        };
        return TrackRef::local(path);
    }
    if location.contains("://") {
        return TrackRef::unknown(location);
    }

    let path = PathBuf::from(location);
    if path.is_absolute() {
        TrackRef::local(path)
    } else {
        TrackRef::local(base_dir.join(path))
    }
}
