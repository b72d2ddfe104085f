// Track detail resolution using lofty with id3 fallback for problematic MP3 files
use id3::TagLike;
use lofty::picture::PictureType;
use lofty::prelude::{Accessor, AudioFile, ItemKey, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Tag;
use std::path::{Path, PathBuf};

use super::parser::{merge_credits, split_artists};
use super::TrackResolver;
use crate::error::ResolveError;
use crate::lyrics::Lyrics;
use crate::track::{file_stem_title, StreamSource, TrackDetail, TrackRef};

// Priority order for cover art (matching foobar2000 behavior)
const COVER_PRIORITY: &[PictureType] = &[
    PictureType::CoverFront,
    PictureType::Media,
    PictureType::CoverBack,
    PictureType::Leaflet,
    PictureType::Other,
];

/// Resolver for tracks that live on local disk.
///
/// Online references only resolve when the catalog already cached a local
/// copy; everything else about them is the embedding application's business.
#[derive(Debug, Clone)]
pub struct LocalResolver {
    pub load_sidecar_lrc: bool,
    pub lyric_offset_ms: i64,
}

impl Default for LocalResolver {
    fn default() -> Self {
        Self {
            load_sidecar_lrc: true,
            lyric_offset_ms: 0,
        }
    }
}

impl TrackResolver for LocalResolver {
    fn resolve(&self, track: &TrackRef) -> Result<TrackDetail, ResolveError> {
        match track {
            TrackRef::Local { path } => self.resolve_file(path),
            TrackRef::Unknown { url } => match local_path_from_url(url) {
                Some(path) => self.resolve_file(&path),
                None => Err(ResolveError::Unavailable(format!("cannot open remote location {}", url))),
            },
            TrackRef::Online(online) => {
                if !online.playable {
                    return Err(ResolveError::Unavailable(format!("{} is not playable", online.id)));
                }
                let cached = online
                    .cached_path
                    .as_ref()
                    .ok_or_else(|| ResolveError::Unavailable(format!("{} has no cached source", online.id)))?;
                let mut detail = self.resolve_file(cached)?;
                // Catalog metadata beats whatever the cache file was tagged with
                detail.title = online.title.clone();
                if !online.artists.is_empty() {
                    detail.artists = online.artists.clone();
                }
                if online.album.is_some() {
                    detail.album = online.album.clone();
                }
                if online.duration_ms.is_some() {
                    detail.duration_ms = online.duration_ms;
                }
                Ok(detail)
            }
        }
    }
}

impl LocalResolver {
    pub fn resolve_file(&self, file_path: &Path) -> Result<TrackDetail, ResolveError> {
        if !file_path.is_file() {
            return Err(ResolveError::NotFound(file_path.to_path_buf()));
        }

        let mut detail = match Probe::open(file_path)
            .and_then(|p| p.guess_file_type().map_err(Into::into))
            .and_then(|p| p.read())
        {
            Ok(tagged_file) => {
                let tag = tagged_file.primary_tag().or(tagged_file.first_tag());
                let mut detail = Self::detail_from_tag(file_path, tag);
                detail.duration_ms = Some(tagged_file.properties().duration().as_millis() as u64)
                    .filter(|d| *d > 0);
                detail
            }
            Err(e) => {
                tracing::warn!(path = %file_path.display(), error = %e, "lofty could not read file, falling back");
                Self::extract_with_fallback(file_path)
            }
        };

        if detail.lyrics.is_none() && self.load_sidecar_lrc {
            detail.lyrics = Self::read_sidecar_lyrics(file_path);
        }
        if self.lyric_offset_ms != 0 {
            if let Some(lyrics) = detail.lyrics.as_mut() {
                for line in lyrics.lines.iter_mut() {
                    line.time_ms -= self.lyric_offset_ms;
                }
            }
        }

        Ok(detail)
    }

    fn detail_from_tag(file_path: &Path, tag: Option<&Tag>) -> TrackDetail {
        let title = tag
            .and_then(|t| t.title().map(|s| s.to_string()))
            .unwrap_or_else(|| file_stem_title(file_path));

        let artist = tag.and_then(|t| t.artist().map(|s| s.to_string()));
        let album_artist = tag.and_then(|t| t.get_string(&ItemKey::AlbumArtist).map(|s| s.to_string()));
        let artists = match (artist.as_deref(), album_artist.as_deref()) {
            (Some(a), _) => split_artists(a),
            (None, Some(aa)) => merge_credits([aa]),
            (None, None) => Vec::new(),
        };

        let album = tag.and_then(|t| t.album().map(|s| s.to_string()));
        let lyrics = tag
            .and_then(|t| t.get_string(&ItemKey::Lyrics))
            .map(Lyrics::parse_lrc)
            .filter(|l| !l.is_empty());

        let cover = tag.and_then(|t| {
            COVER_PRIORITY.iter().find_map(|pic_type| {
                t.pictures()
                    .iter()
                    .find(|p| p.pic_type() == *pic_type)
                    .map(|p| p.data().to_vec())
            })
        });

        TrackDetail {
            title,
            artists,
            album,
            duration_ms: None,
            source: StreamSource::File(file_path.to_path_buf()),
            cover,
            lyrics,
        }
    }

    /// Fallback extraction method - uses id3 crate for MP3 files, minimal info for others
    fn extract_with_fallback(file_path: &Path) -> TrackDetail {
        let extension = file_path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());

        if extension.as_deref() == Some("mp3") {
            match id3::Tag::read_from_path(file_path) {
                Ok(tag) => {
                    tracing::debug!(path = %file_path.display(), "extracted metadata using id3 fallback");
                    return TrackDetail {
                        title: tag
                            .title()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| file_stem_title(file_path)),
                        artists: tag.artist().map(split_artists).unwrap_or_default(),
                        album: tag.album().map(|s| s.to_string()),
                        // TLEN is stored in milliseconds
                        duration_ms: tag.duration().map(u64::from),
                        source: StreamSource::File(file_path.to_path_buf()),
                        cover: tag.pictures().next().map(|p| p.data.clone()),
                        lyrics: tag
                            .lyrics()
                            .next()
                            .map(|l| Lyrics::parse_lrc(&l.text))
                            .filter(|l| !l.is_empty()),
                    };
                }
                Err(e) => {
                    tracing::warn!(path = %file_path.display(), error = %e, "id3 fallback failed");
                }
            }
        }

        // Final fallback: the backend may still be able to decode it
        TrackDetail {
            title: file_stem_title(file_path),
            artists: Vec::new(),
            album: None,
            duration_ms: None,
            source: StreamSource::File(file_path.to_path_buf()),
            cover: None,
            lyrics: None,
        }
    }

    fn read_sidecar_lyrics(file_path: &Path) -> Option<Lyrics> {
        let lrc_path = file_path.with_extension("lrc");
        let content = std::fs::read_to_string(&lrc_path).ok()?;
        let lyrics = Lyrics::parse_lrc(&content);
        if lyrics.is_empty() {
            None
        } else {
            tracing::debug!(path = %lrc_path.display(), lines = lyrics.len(), "loaded sidecar lyrics");
            Some(lyrics)
        }
    }
}

/// Interpret an unclassified location as a local file when possible
fn local_path_from_url(url: &str) -> Option<PathBuf> {
    let candidate = match url.strip_prefix("file://") {
        Some(rest) => PathBuf::from(rest),
        None if url.contains("://") => return None,
        None => PathBuf::from(url),
    };
    candidate.is_file().then_some(candidate)
}
