// Play queue model
// Ordered base list plus an optional shuffled projection over the same entries

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};

use crate::playback::RepeatMode;
use crate::track::TrackRef;

/// One queued track. `index` is always the entry's offset in the list that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub index: usize,
    /// Stable identity shared by the base and shuffled copies of an entry
    pub uid: u64,
    pub track: TrackRef,
}

/// Result of removing an entry
#[derive(Debug, Clone)]
pub struct RemoveOutcome {
    pub removed: QueueEntry,
    /// The removed entry was the playing one
    pub was_playing: bool,
    /// New playing index after removal, if any
    pub playing: Option<usize>,
}

impl RemoveOutcome {
    pub fn emptied(&self) -> bool {
        self.was_playing && self.playing.is_none()
    }
}

/// What the player should do after the current track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTrack {
    Play(usize),
    /// End of a non-repeating queue: load this index but stay paused
    Finished(usize),
}

#[derive(Debug, Clone)]
pub struct PlayQueue {
    name: String,
    base: Vec<QueueEntry>,
    shuffled: Option<Vec<QueueEntry>>,
    /// Index into the active projection
    playing: Option<usize>,
    next_uid: u64,
    rng: StdRng,
}

impl Default for PlayQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Queue with a deterministic shuffle order
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            name: String::new(),
            base: Vec::new(),
            shuffled: None,
            playing: None,
            next_uid: 1,
            rng,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled.is_some()
    }

    /// Entries in play order (shuffled when shuffle is on)
    pub fn entries(&self) -> &[QueueEntry] {
        self.shuffled.as_deref().unwrap_or(&self.base)
    }

    /// Entries in their original order regardless of shuffle
    pub fn base_entries(&self) -> &[QueueEntry] {
        &self.base
    }

    pub fn get(&self, index: usize) -> Option<&QueueEntry> {
        self.entries().get(index)
    }

    pub fn playing(&self) -> Option<usize> {
        self.playing
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.playing.and_then(|i| self.get(i))
    }

    /// Mark an index as playing. Out of range indices are rejected.
    pub fn set_playing(&mut self, index: usize) -> bool {
        if index < self.len() {
            self.playing = Some(index);
            true
        } else {
            false
        }
    }

    pub fn clear_playing(&mut self) {
        self.playing = None;
    }

    /// Position of the first entry referring to `track` in play order
    pub fn position_of(&self, track: &TrackRef) -> Option<usize> {
        self.entries().iter().position(|e| &e.track == track)
    }

    /// Replace the whole queue. Returns false without touching anything when
    /// the name and tracks match what is already queued.
    pub fn set_queue(&mut self, name: impl Into<String>, tracks: Vec<TrackRef>) -> bool {
        let name = name.into();
        if name == self.name
            && tracks.len() == self.base.len()
            && self.base.iter().zip(&tracks).all(|(e, t)| &e.track == t)
        {
            return false;
        }

        self.name = name;
        self.base = tracks
            .into_iter()
            .enumerate()
            .map(|(index, track)| QueueEntry { index, uid: self.bump_uid(), track })
            .collect();
        self.playing = None;
        if self.shuffled.is_some() {
            self.shuffled = Some(self.shuffle_base());
        }
        true
    }

    /// Insert tracks at `index` (clamped) in play order
    pub fn insert_at(&mut self, index: usize, tracks: Vec<TrackRef>) -> usize {
        let count = tracks.len();
        if count == 0 {
            return 0;
        }
        let index = index.min(self.len());
        let new_entries: Vec<QueueEntry> = tracks
            .into_iter()
            .map(|track| QueueEntry { index: 0, uid: self.bump_uid(), track })
            .collect();

        if let Some(shuffled) = self.shuffled.as_mut() {
            // Base copy goes right after whatever precedes the insertion point
            let base_at = match index.checked_sub(1).map(|i| shuffled[i].uid) {
                Some(uid) => self.base.iter().position(|e| e.uid == uid).map_or(0, |p| p + 1),
                None => 0,
            };
            shuffled.splice(index..index, new_entries.iter().cloned());
            reindex(shuffled);
            self.base.splice(base_at..base_at, new_entries);
        } else {
            self.base.splice(index..index, new_entries);
        }
        reindex(&mut self.base);

        if let Some(playing) = self.playing {
            if index <= playing {
                self.playing = Some(playing + count);
            }
        }
        count
    }

    pub fn append(&mut self, tracks: Vec<TrackRef>) -> usize {
        self.insert_at(self.len(), tracks)
    }

    /// Remove the entry at `index` in play order.
    ///
    /// Removing the playing entry selects its successor (wrapping to the
    /// front) before the removal, and the playing index becomes that
    /// successor's position afterwards.
    pub fn remove_at(&mut self, index: usize) -> Option<RemoveOutcome> {
        let len = self.len();
        if index >= len {
            return None;
        }

        let was_playing = self.playing == Some(index);
        let playing = match self.playing {
            _ if len == 1 => None,
            Some(p) if p == index => {
                let replacement = (index + 1) % len;
                Some(if replacement == 0 { 0 } else { replacement - 1 })
            }
            Some(p) if p > index => Some(p - 1),
            other => other,
        };

        let removed = match self.shuffled.as_mut() {
            Some(shuffled) => {
                let removed = shuffled.remove(index);
                reindex(shuffled);
                self.base.retain(|e| e.uid != removed.uid);
                removed
            }
            None => self.base.remove(index),
        };
        reindex(&mut self.base);

        self.playing = playing;
        if self.base.is_empty() {
            self.playing = None;
        }

        Some(RemoveOutcome { removed, was_playing, playing: self.playing })
    }

    pub fn move_up(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.len() {
            return false;
        }
        self.swap(index - 1, index);
        true
    }

    pub fn move_down(&mut self, index: usize) -> bool {
        if index + 1 >= self.len() {
            return false;
        }
        self.swap(index, index + 1);
        true
    }

    fn swap(&mut self, a: usize, b: usize) {
        let list = match self.shuffled.as_mut() {
            Some(shuffled) => shuffled,
            None => &mut self.base,
        };
        list.swap(a, b);
        list[a].index = a;
        list[b].index = b;

        self.playing = match self.playing {
            Some(p) if p == a => Some(b),
            Some(p) if p == b => Some(a),
            other => other,
        };
    }

    /// Switch between base and shuffled order, keeping the playing entry selected
    pub fn toggle_shuffle(&mut self) -> bool {
        let playing_uid = self.current().map(|e| e.uid);

        if self.shuffled.take().is_none() {
            self.shuffled = Some(self.shuffle_base());
        }
        reindex(&mut self.base);

        self.playing = playing_uid.and_then(|uid| self.entries().iter().position(|e| e.uid == uid));
        self.is_shuffled()
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        if enabled != self.is_shuffled() {
            self.toggle_shuffle();
        }
    }

    fn shuffle_base(&mut self) -> Vec<QueueEntry> {
        let mut shuffled = self.base.clone();
        shuffled.shuffle(&mut self.rng);
        reindex(&mut shuffled);
        shuffled
    }

    fn bump_uid(&mut self) -> u64 {
        let uid = self.next_uid;
        self.next_uid += 1;
        uid
    }

    /// Index to play after the current one on an explicit skip or natural end
    pub fn next_index(&self, repeat: RepeatMode) -> Option<NextTrack> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        let Some(current) = self.playing else {
            return Some(NextTrack::Play(0));
        };
        Some(match repeat {
            RepeatMode::All => NextTrack::Play((current + 1) % len),
            RepeatMode::Off | RepeatMode::One if current + 1 < len => NextTrack::Play(current + 1),
            RepeatMode::Off | RepeatMode::One => NextTrack::Finished(0),
        })
    }

    pub fn previous_index(&self, repeat: RepeatMode) -> Option<usize> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        let Some(current) = self.playing else {
            return Some(0);
        };
        Some(match repeat {
            RepeatMode::All => (current + len - 1) % len,
            RepeatMode::Off | RepeatMode::One => current.saturating_sub(1),
        })
    }

    /// Rebuild a queue from persisted parts. Inconsistent shuffle orders are
    /// dropped and the playing index is discarded when out of range.
    pub fn restore(
        name: String,
        base: Vec<(u64, TrackRef)>,
        shuffled_order: Option<Vec<u64>>,
        playing: Option<usize>,
    ) -> Self {
        let mut queue = Self::new();
        queue.name = name;
        queue.base = base
            .into_iter()
            .enumerate()
            .map(|(index, (uid, track))| QueueEntry { index, uid, track })
            .collect();
        queue.next_uid = queue.base.iter().map(|e| e.uid).max().unwrap_or(0) + 1;

        queue.playing = playing.filter(|&p| p < queue.base.len());

        let unique: HashSet<u64> = queue.base.iter().map(|e| e.uid).collect();
        if unique.len() != queue.base.len() {
            tracing::warn!("Duplicate entry ids in saved queue, renumbering");
            for (i, entry) in queue.base.iter_mut().enumerate() {
                entry.uid = i as u64 + 1;
            }
            queue.next_uid = queue.base.len() as u64 + 1;
            return queue;
        }

        let by_uid: HashMap<u64, &QueueEntry> = queue.base.iter().map(|e| (e.uid, e)).collect();
        queue.shuffled = shuffled_order.and_then(|order| {
            let mut seen = HashSet::new();
            let mut list = Vec::with_capacity(order.len());
            for uid in order {
                if !seen.insert(uid) {
                    return None;
                }
                list.push((*by_uid.get(&uid)?).clone());
            }
            if list.len() != by_uid.len() {
                return None;
            }
            reindex(&mut list);
            Some(list)
        });
        queue
    }

    /// Uids in shuffled order, when shuffle is on
    pub fn shuffled_order(&self) -> Option<Vec<u64>> {
        self.shuffled.as_ref().map(|list| list.iter().map(|e| e.uid).collect())
    }
}

fn reindex(entries: &mut [QueueEntry]) {
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.index = i;
    }
}
