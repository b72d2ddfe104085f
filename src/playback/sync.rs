// Position and lyric synchronization
use crate::lyrics::Lyrics;

/// One sample of the playback clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub elapsed_ms: u64,
    pub duration_ms: u64,
}

impl PositionSample {
    pub fn new(position_secs: f64, duration_ms: u64) -> Self {
        let elapsed_ms = (position_secs.max(0.0) * 1000.0).round() as u64;
        Self { elapsed_ms, duration_ms }
    }

    /// Share of the track played, 0.0 when the duration is unknown
    pub fn fraction(&self) -> f64 {
        if self.duration_ms == 0 {
            0.0
        } else {
            (self.elapsed_ms as f64 / self.duration_ms as f64).clamp(0.0, 1.0)
        }
    }
}

/// Lyric highlight change produced by a tick or seek
#[derive(Debug, Clone, PartialEq)]
pub struct LyricChange {
    pub previous: Option<usize>,
    pub index: usize,
    pub text: String,
}

/// Recompute the active lyric line. Returns a change only when the index moved.
pub fn recompute_lyric(lyrics: Option<&Lyrics>, current: Option<usize>, elapsed_ms: u64) -> Option<LyricChange> {
    let lyrics = lyrics.filter(|l| l.synced && !l.is_empty())?;
    let index = lyrics.active_index(elapsed_ms as i64)?;
    if current == Some(index) {
        return None;
    }
    let text = lyrics.line(index).map(|l| l.text.clone()).unwrap_or_default();
    Some(LyricChange { previous: current, index, text })
}
