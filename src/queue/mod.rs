// Queue management module
// This module handles the play queue and its persisted snapshot

pub mod manager;
pub mod persistence;

pub use manager::{NextTrack, PlayQueue, QueueEntry, RemoveOutcome};
pub use persistence::{QueueSnapshot, SessionSnapshot, SnapshotEntry, SnapshotStore, SnapshotWriter};
