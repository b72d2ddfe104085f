use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

use crate::db::connection::DatabaseConnection;
use crate::playback::RepeatMode;
use crate::queue::{QueueSnapshot, SessionSnapshot, SnapshotEntry, SnapshotStore};
use crate::track::TrackRef;

/// Database operations for the saved session
pub struct DbOperations;

impl DbOperations {
    /// Replace the saved session with `snapshot`
    pub fn save_session_snapshot(db: &DatabaseConnection, snapshot: &QueueSnapshot) -> Result<()> {
        let mut conn = db.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM session_tracks", [])?;
        tx.execute("DELETE FROM session", [])?;

        let session = &snapshot.session;
        tx.execute(
            "INSERT INTO session (id, name, playing_index, playing_uid, repeat_mode, volume, speed, muted, position_ms, saved_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                snapshot.name,
                snapshot.playing.map(|i| i as i64),
                snapshot.playing_uid().map(|uid| uid as i64),
                session.repeat.as_str(),
                session.volume as f64,
                session.speed as f64,
                session.muted,
                session.position_ms as i64,
                snapshot.saved_at.to_rfc3339(),
            ],
        )?;

        let shuffled_positions: HashMap<u64, i64> = snapshot
            .shuffled_order
            .iter()
            .flatten()
            .enumerate()
            .map(|(p, uid)| (*uid, p as i64))
            .collect();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO session_tracks (position, uid, shuffled_position, track_json) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, entry) in snapshot.entries.iter().enumerate() {
                let shuffled_position = shuffled_positions.get(&entry.uid).copied();
                let track_json = serde_json::to_string(&entry.track)?;
                stmt.execute(params![position as i64, entry.uid as i64, shuffled_position, track_json])?;
            }
        }

        tx.commit()?;
        tracing::trace!(entries = snapshot.entries.len(), "Saved session snapshot");
        Ok(())
    }

    /// Load the saved session, if there is one
    pub fn load_session_snapshot(db: &DatabaseConnection) -> Result<Option<QueueSnapshot>> {
        let conn = db.lock()?;

        let row = conn
            .query_row(
                "SELECT name, playing_index, playing_uid, repeat_mode, volume, speed, muted, position_ms, saved_at
                 FROM session WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, bool>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, playing_index, playing_uid, repeat, volume, speed, muted, position_ms, saved_at)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT uid, shuffled_position, track_json FROM session_tracks ORDER BY position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        let mut skipped = 0;
        let mut shuffled: Vec<(i64, u64)> = Vec::new();
        for row in rows {
            let (uid, shuffled_position, track_json) = row?;
            let track: TrackRef = match serde_json::from_str(&track_json) {
                Ok(track) => track,
                Err(e) => {
                    // Whatever we can't read is simply not restored
                    tracing::warn!(error = %e, "Skipping unreadable saved track");
                    skipped += 1;
                    continue;
                }
            };
            if let Some(p) = shuffled_position {
                shuffled.push((p, uid as u64));
            }
            entries.push(SnapshotEntry { uid: uid as u64, track });
        }

        shuffled.sort_by_key(|(p, _)| *p);
        let shuffled_order: Option<Vec<u64>> = if shuffled.is_empty() {
            None
        } else {
            Some(shuffled.into_iter().map(|(_, uid)| uid).collect())
        };

        let playing = match playing_uid {
            Some(uid) => {
                let uid = uid as u64;
                match shuffled_order.as_ref() {
                    Some(order) => order.iter().position(|u| *u == uid),
                    None => entries.iter().position(|e| e.uid == uid),
                }
            }
            // Sessions saved before uids were stored; the index is only
            // trustworthy when every row came back
            None if skipped == 0 => playing_index.and_then(|i| usize::try_from(i).ok()),
            None => None,
        };

        let repeat = repeat.parse::<RepeatMode>().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unknown saved repeat mode");
            RepeatMode::Off
        });
        let saved_at = DateTime::parse_from_rfc3339(&saved_at)
            .with_context(|| format!("Invalid saved_at timestamp {:?}", saved_at))?
            .with_timezone(&Utc);

        Ok(Some(QueueSnapshot {
            name,
            entries,
            shuffled_order,
            playing,
            session: SessionSnapshot {
                repeat,
                volume: volume as f32,
                speed: speed as f32,
                muted,
                position_ms: position_ms.max(0) as u64,
            },
            saved_at,
        }))
    }
}

impl SnapshotStore for DatabaseConnection {
    fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
        DbOperations::save_session_snapshot(self, snapshot)
    }

    fn load(&self) -> Result<Option<QueueSnapshot>> {
        DbOperations::load_session_snapshot(self)
    }
}
