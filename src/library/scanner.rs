use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::playlist::M3uPlaylist;
use crate::track::TrackRef;

/// List of supported audio file extensions
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "wav", "m4a", "aac",
];

const PLAYLIST_EXTENSIONS: &[&str] = &["m3u", "m3u8"];

fn extension_in(path: &Path, list: &[&str]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| list.contains(&ext.as_str()))
}

pub fn is_audio_file(path: &Path) -> bool {
    extension_in(path, SUPPORTED_EXTENSIONS)
}

pub fn is_playlist_file(path: &Path) -> bool {
    extension_in(path, PLAYLIST_EXTENSIONS)
}

/// Scanner for finding audio files in a directory tree
pub struct DirectoryScanner;

impl DirectoryScanner {
    /// Scan a directory recursively and return its audio files in path order
    pub fn scan<P: AsRef<Path>>(directory: P) -> Result<Vec<TrackRef>, anyhow::Error> {
        let directory = directory.as_ref();
        if !directory.is_dir() {
            anyhow::bail!("Not a directory: {:?}", directory);
        }

        let mut audio_files: Vec<PathBuf> = WalkDir::new(directory)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::debug!(error = %err, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
            .map(|entry| entry.into_path())
            .collect();

        audio_files.sort();
        tracing::debug!(directory = ?directory, count = audio_files.len(), "Scanned directory");
        Ok(audio_files.into_iter().map(TrackRef::local).collect())
    }

    /// Turn command-line style inputs (files, folders, playlists, URLs) into
    /// queue contents, in the order given. Inputs that can't be used are logged
    /// and skipped.
    pub fn expand<I, S>(inputs: I) -> Vec<TrackRef>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tracks = Vec::new();
        for input in inputs {
            let input = input.as_ref();
            if input.contains("://") {
                tracks.push(TrackRef::unknown(input));
                continue;
            }

            let path = Path::new(input);
            if path.is_dir() {
                match Self::scan(path) {
                    Ok(found) => tracks.extend(found),
                    Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to scan folder"),
                }
            } else if is_playlist_file(path) {
                match M3uPlaylist::read(path) {
                    Ok(playlist) => tracks.extend(playlist.tracks()),
                    Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to read playlist"),
                }
            } else if path.is_file() {
                tracks.push(TrackRef::local(path));
            } else {
                tracing::warn!(path = ?path, "No such file or folder");
            }
        }
        tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_finds_sorted_audio_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b_album")).unwrap();
        fs::create_dir_all(dir.path().join("a_album")).unwrap();
        fs::write(dir.path().join("b_album/02.FLAC"), b"").unwrap();
        fs::write(dir.path().join("b_album/01.mp3"), b"").unwrap();
        fs::write(dir.path().join("a_album/track.ogg"), b"").unwrap();
        fs::write(dir.path().join("a_album/cover.jpg"), b"").unwrap();

        let tracks = DirectoryScanner::scan(dir.path()).unwrap();
        let names: Vec<String> = tracks.iter().map(|t| t.display_title()).collect();
        assert_eq!(names, vec!["track", "01", "02"]);
    }

    #[test]
    fn test_scan_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.mp3");
        fs::write(&file, b"").unwrap();
        assert!(DirectoryScanner::scan(&file).is_err());
    }

    #[test]
    fn test_expand_mixed_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.wav");
        fs::write(&song, b"").unwrap();
        let list = dir.path().join("list.m3u8");
        fs::write(&list, "#EXTM3U\nsong.wav\nhttp://example.com/s.mp3\n").unwrap();

        let inputs = vec![
            song.to_string_lossy().into_owned(),
            list.to_string_lossy().into_owned(),
            dir.path().join("missing.mp3").to_string_lossy().into_owned(),
            "https://example.com/direct.mp3".to_string(),
        ];
        let tracks = DirectoryScanner::expand(inputs);
        assert_eq!(
            tracks,
            vec![
                TrackRef::local(&song),
                TrackRef::local(&song),
                TrackRef::unknown("http://example.com/s.mp3"),
                TrackRef::unknown("https://example.com/direct.mp3"),
            ]
        );
    }
}
