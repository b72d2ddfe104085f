// Database migrations
use anyhow::Result;
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 2;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Single-row table describing the last session
    conn.execute(
        "CREATE TABLE IF NOT EXISTS session (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            name TEXT NOT NULL,
            playing_index INTEGER,
            repeat_mode TEXT NOT NULL DEFAULT 'off',
            volume REAL NOT NULL DEFAULT 1.0,
            speed REAL NOT NULL DEFAULT 1.0,
            muted BOOLEAN NOT NULL DEFAULT 0,
            position_ms INTEGER NOT NULL DEFAULT 0,
            saved_at TEXT NOT NULL
        )",
        [],
    )?;

    // Queue entries in base order; shuffled_position is NULL when shuffle is off
    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_tracks (
            position INTEGER PRIMARY KEY,
            uid INTEGER UNIQUE NOT NULL,
            shuffled_position INTEGER,
            track_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_session_tracks_shuffled ON session_tracks(shuffled_position)",
        [],
    )?;

    if version < 2 {
        // The playing entry is tracked by uid so skipped rows can't shift it
        conn.execute("ALTER TABLE session ADD COLUMN playing_uid INTEGER", [])?;
    }

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tracing::info!(version = SCHEMA_VERSION, "Database schema migrated");
    Ok(())
}
