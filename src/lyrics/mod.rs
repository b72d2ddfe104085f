// Lyric timelines
// Parses LRC text into a sorted timeline and answers "which line is active"

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub struct LyricLine {
    pub time_ms: i64,
    pub text: String,
    /// Second line sharing the same timestamp (common in bilingual LRC files)
    pub translation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Lyrics {
    pub lines: Vec<LyricLine>,
    pub synced: bool,
}

fn timestamp_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\[(\d{1,3}):(\d{1,2})(?:[.:](\d{1,3}))?\]").unwrap())
}

fn tag_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^\[([a-zA-Z#]+):(.*)\]$").unwrap())
}

impl Lyrics {
    /// Build a timeline from already-timed lines
    pub fn from_lines(mut lines: Vec<LyricLine>) -> Self {
        lines.sort_by_key(|l| l.time_ms);
        Self { lines, synced: true }
    }

    /// Parse LRC content.
    ///
    /// Lines may carry several timestamps (`[00:12.00][01:30.50]chorus`). An
    /// `[offset:ms]` tag shifts every timestamp; other ID tags are dropped.
    /// Text without any timestamps yields an unsynced timeline whose lines all
    /// sit at zero.
    pub fn parse_lrc(content: &str) -> Self {
        let mut offset_ms: i64 = 0;
        let mut timed: Vec<(i64, String)> = Vec::new();
        let mut plain: Vec<String> = Vec::new();

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = tag_regex().captures(line) {
                if caps[1].eq_ignore_ascii_case("offset") {
                    offset_ms = caps[2].trim().parse().unwrap_or(0);
                }
                continue;
            }

            let mut stamps = Vec::new();
            let mut text_start = 0;
            for caps in timestamp_regex().captures_iter(line) {
                let whole = caps.get(0).unwrap();
                // Timestamps only count as a leading run
                if whole.start() != text_start {
                    break;
                }
                text_start = whole.end();
                stamps.push(parse_timestamp(&caps));
            }

            let text = line[text_start..].trim().to_string();
            if stamps.is_empty() {
                plain.push(text);
            } else {
                for stamp in stamps {
                    timed.push((stamp, text.clone()));
                }
            }
        }

        if timed.is_empty() {
            return Self {
                lines: plain
                    .into_iter()
                    .map(|text| LyricLine { time_ms: 0, text, translation: None })
                    .collect(),
                synced: false,
            };
        }

        // Stable sort keeps original/translation order for equal timestamps
        timed.sort_by_key(|(t, _)| *t);

        let mut lines: Vec<LyricLine> = Vec::with_capacity(timed.len());
        for (time, text) in timed {
            let time_ms = time - offset_ms;
            match lines.last_mut() {
                Some(prev) if prev.time_ms == time_ms && prev.translation.is_none() && !text.is_empty() => {
                    prev.translation = Some(text);
                }
                _ => lines.push(LyricLine { time_ms, text, translation: None }),
            }
        }

        Self { lines, synced: true }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Index of the line that should be highlighted at `position_ms`.
    ///
    /// The last line whose timestamp does not exceed the position wins. When
    /// every timestamp is later than the position the first line is returned
    /// rather than nothing, so the highlight never goes blank mid-track.
    pub fn active_index(&self, position_ms: i64) -> Option<usize> {
        if self.lines.is_empty() {
            return None;
        }
        let mut active = 0;
        for (i, line) in self.lines.iter().enumerate() {
            if line.time_ms <= position_ms {
                active = i;
            } else {
                break;
            }
        }
        Some(active)
    }

    pub fn line(&self, index: usize) -> Option<&LyricLine> {
        self.lines.get(index)
    }
}

fn parse_timestamp(caps: &regex::Captures<'_>) -> i64 {
    let minutes: i64 = caps[1].parse().unwrap_or(0);
    let seconds: i64 = caps[2].parse().unwrap_or(0);
    let fraction = caps.get(3).map(|m| m.as_str()).unwrap_or("");
    let fraction_ms: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().unwrap_or(0) * 100,
        2 => fraction.parse::<i64>().unwrap_or(0) * 10,
        _ => fraction.parse::<i64>().unwrap_or(0),
    };
    (minutes * 60 + seconds) * 1000 + fraction_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline(times: &[i64]) -> Lyrics {
        Lyrics::from_lines(
            times
                .iter()
                .map(|&t| LyricLine { time_ms: t, text: format!("line {}", t), translation: None })
                .collect(),
        )
    }

    #[test]
    fn test_active_index_lookup() {
        let lyrics = timeline(&[0, 1000, 2000]);
        assert_eq!(lyrics.active_index(1500), Some(1));
        assert_eq!(lyrics.active_index(-1), Some(0));
        assert_eq!(lyrics.active_index(0), Some(0));
        assert_eq!(lyrics.active_index(5000), Some(2));
    }

    #[test]
    fn test_active_index_clamps_to_first_line() {
        let lyrics = timeline(&[3000, 4000]);
        assert_eq!(lyrics.active_index(100), Some(0));
        assert_eq!(Lyrics::default().active_index(100), None);
    }

    #[test]
    fn test_parse_basic_lrc() {
        let lyrics = Lyrics::parse_lrc(
            "[ti:Song]\n[ar:Someone]\n[00:01.00]first\n[00:02.50]second\n[00:10.123]third",
        );
        assert!(lyrics.synced);
        let times: Vec<i64> = lyrics.lines.iter().map(|l| l.time_ms).collect();
        assert_eq!(times, vec![1000, 2500, 10123]);
        assert_eq!(lyrics.lines[1].text, "second");
    }

    #[test]
    fn test_parse_repeated_timestamps_and_offset() {
        let lyrics = Lyrics::parse_lrc("[offset:500]\n[00:10.00][00:20.00]chorus\n[00:05.00]verse");
        let times: Vec<i64> = lyrics.lines.iter().map(|l| l.time_ms).collect();
        assert_eq!(times, vec![4500, 9500, 19500]);
        assert_eq!(lyrics.lines[1].text, "chorus");
        assert_eq!(lyrics.lines[2].text, "chorus");
    }

    #[test]
    fn test_parse_merges_translation_lines() {
        let lyrics = Lyrics::parse_lrc("[00:01.00]こんにちは\n[00:01.00]hello\n[00:02.00]next");
        assert_eq!(lyrics.len(), 2);
        assert_eq!(lyrics.lines[0].text, "こんにちは");
        assert_eq!(lyrics.lines[0].translation.as_deref(), Some("hello"));
    }

    #[test]
    fn test_parse_plain_text_is_unsynced() {
        let lyrics = Lyrics::parse_lrc("just words\nmore words");
        assert!(!lyrics.synced);
        assert_eq!(lyrics.len(), 2);
        assert!(lyrics.lines.iter().all(|l| l.time_ms == 0));
    }
}
