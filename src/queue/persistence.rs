// Persisted form of the play queue and the session around it
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::manager::PlayQueue;
use crate::playback::RepeatMode;
use crate::track::TrackRef;

/// Session values stored next to the queue
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub repeat: RepeatMode,
    pub volume: f32,
    pub speed: f32,
    pub muted: bool,
    /// Position inside the playing track when the snapshot was taken
    pub position_ms: u64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            repeat: RepeatMode::Off,
            volume: 1.0,
            speed: 1.0,
            muted: false,
            position_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub uid: u64,
    pub track: TrackRef,
}

/// Everything needed to resume the last session
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub name: String,
    /// Entries in base order
    pub entries: Vec<SnapshotEntry>,
    /// Entry uids in shuffled order; `None` when shuffle is off
    pub shuffled_order: Option<Vec<u64>>,
    pub playing: Option<usize>,
    pub session: SessionSnapshot,
    pub saved_at: DateTime<Utc>,
}

/// Somewhere snapshots survive a restart
pub trait SnapshotStore: Send + Sync + 'static {
    fn save(&self, snapshot: &QueueSnapshot) -> anyhow::Result<()>;
    fn load(&self) -> anyhow::Result<Option<QueueSnapshot>>;
}

impl QueueSnapshot {
    pub fn capture(queue: &PlayQueue, session: SessionSnapshot) -> Self {
        Self {
            name: queue.name().to_string(),
            entries: queue
                .base_entries()
                .iter()
                .map(|e| SnapshotEntry { uid: e.uid, track: e.track.clone() })
                .collect(),
            shuffled_order: queue.shuffled_order(),
            playing: queue.playing(),
            session,
            saved_at: Utc::now(),
        }
    }

    /// Uid of the playing entry, looked up in the active order
    pub fn playing_uid(&self) -> Option<u64> {
        let index = self.playing?;
        match self.shuffled_order.as_ref() {
            Some(order) => order.get(index).copied(),
            None => self.entries.get(index).map(|e| e.uid),
        }
    }

    /// Equal apart from when it was taken
    pub fn same_state(&self, other: &QueueSnapshot) -> bool {
        self.name == other.name
            && self.playing == other.playing
            && self.session == other.session
            && self.shuffled_order == other.shuffled_order
            && self.entries == other.entries
    }

    pub fn shuffle(&self) -> bool {
        self.shuffled_order.is_some()
    }

    pub fn to_queue(&self) -> PlayQueue {
        PlayQueue::restore(
            self.name.clone(),
            self.entries.iter().map(|e| (e.uid, e.track.clone())).collect(),
            self.shuffled_order.clone(),
            self.playing,
        )
    }
}

/// Writes snapshots from a background task so the player never waits on
/// storage. Snapshots equal to the last one submitted are dropped, and a
/// backlog collapses to its newest snapshot.
pub struct SnapshotWriter {
    tx: Option<mpsc::UnboundedSender<QueueSnapshot>>,
    task: Option<JoinHandle<()>>,
    last: Option<QueueSnapshot>,
}

impl SnapshotWriter {
    /// Must be called inside a tokio runtime
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_snapshots(store, rx));
        Self {
            tx: Some(tx),
            task: Some(task),
            last: None,
        }
    }

    /// Queue a snapshot for writing. Returns false when it was skipped.
    pub fn submit(&mut self, snapshot: QueueSnapshot) -> bool {
        if self.last.as_ref().is_some_and(|last| last.same_state(&snapshot)) {
            return false;
        }
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        if tx.send(snapshot.clone()).is_err() {
            tracing::warn!("snapshot writer is gone");
            return false;
        }
        self.last = Some(snapshot);
        true
    }

    /// Write whatever is pending and stop the background task
    pub async fn finish(&mut self) {
        self.tx = None;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "snapshot writer failed");
            }
        }
    }
}

async fn write_snapshots(store: Arc<dyn SnapshotStore>, mut rx: mpsc::UnboundedReceiver<QueueSnapshot>) {
    while let Some(mut snapshot) = rx.recv().await {
        while let Ok(newer) = rx.try_recv() {
            snapshot = newer;
        }
        let store = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to save queue snapshot"),
            Err(e) => tracing::warn!(error = %e, "snapshot save task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingStore {
        saved: Mutex<Vec<QueueSnapshot>>,
    }

    impl SnapshotStore for CountingStore {
        fn save(&self, snapshot: &QueueSnapshot) -> anyhow::Result<()> {
            self.saved.lock().push(snapshot.clone());
            Ok(())
        }

        fn load(&self) -> anyhow::Result<Option<QueueSnapshot>> {
            Ok(self.saved.lock().last().cloned())
        }
    }

    fn queue_of(n: usize) -> PlayQueue {
        let mut queue = PlayQueue::with_seed(5);
        queue.set_queue("q", (0..n).map(|i| TrackRef::local(format!("/m/{}.ogg", i))).collect());
        queue
    }

    #[tokio::test]
    async fn test_writer_skips_unchanged_and_flushes_on_finish() {
        let store = Arc::new(CountingStore::default());
        let mut writer = SnapshotWriter::spawn(store.clone());
        let queue = queue_of(3);

        let first = QueueSnapshot::capture(&queue, SessionSnapshot::default());
        assert!(writer.submit(first.clone()));
        // Same state, only the timestamp differs
        let mut again = first.clone();
        again.saved_at = Utc::now() + chrono::Duration::seconds(5);
        assert!(!writer.submit(again));

        let louder = QueueSnapshot::capture(
            &queue,
            SessionSnapshot {
                volume: 0.4,
                ..Default::default()
            },
        );
        assert!(writer.submit(louder));
        writer.finish().await;

        let saved = store.saved.lock();
        assert!(!saved.is_empty() && saved.len() <= 2);
        assert_eq!(saved.last().unwrap().session.volume, 0.4);
        drop(saved);
        assert!(!writer.submit(first));
    }

    #[test]
    fn test_playing_uid_follows_active_order() {
        let mut queue = queue_of(5);
        queue.set_playing(3);
        let plain = QueueSnapshot::capture(&queue, SessionSnapshot::default());
        assert_eq!(plain.playing_uid(), Some(plain.entries[3].uid));

        queue.toggle_shuffle();
        let shuffled = QueueSnapshot::capture(&queue, SessionSnapshot::default());
        assert_eq!(shuffled.playing_uid(), queue.current().map(|e| e.uid));
    }

    #[test]
    fn test_capture_and_restore_keeps_shuffle_and_playing() {
        let mut queue = PlayQueue::with_seed(3);
        queue.set_queue(
            "album",
            (0..6).map(|i| TrackRef::local(format!("/m/{}.flac", i))).collect(),
        );
        queue.toggle_shuffle();
        queue.set_playing(4);
        let playing_track = queue.current().unwrap().track.clone();

        let snapshot = QueueSnapshot::capture(&queue, SessionSnapshot::default());
        assert!(snapshot.shuffle());

        let restored = snapshot.to_queue();
        assert_eq!(restored.name(), "album");
        assert_eq!(restored.entries(), queue.entries());
        assert_eq!(restored.current().unwrap().track, playing_track);
    }
}
