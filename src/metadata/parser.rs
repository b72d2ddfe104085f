/// Utility functions for parsing multi-value metadata fields

use regex::Regex;
use std::sync::OnceLock;

/// Get the regex pattern for splitting artist credits
fn get_separator_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        // Match any of: comma, semicolon, slash, pipe, ideographic comma, ampersand,
        // "ft.", "feat.", "featuring"
        Regex::new(r#"[,;/|、&]|\s+(?:ft\.?|feat\.?|featuring)\s+"#).unwrap()
    })
}

/// Split an artist credit into individual artists.
///
/// Duplicates (compared case-insensitively) keep their first spelling, so
/// "A & B feat. a" yields `["A", "B"]`.
pub fn split_artists(credit: &str) -> Vec<String> {
    let mut artists: Vec<String> = Vec::new();
    for part in get_separator_regex().split(credit) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if artists.iter().any(|a| a.eq_ignore_ascii_case(part)) {
            continue;
        }
        artists.push(part.to_string());
    }
    artists
}

/// Merge several credits (e.g. artist and album artist) into one list
pub fn merge_credits<'a>(credits: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let joined = credits.into_iter().collect::<Vec<_>>().join(";");
    split_artists(&joined)
}
