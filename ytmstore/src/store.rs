//! SQLite persistence for track records.
//!
//! Schema (one row per video ID):
//!
//! ```text
//! tracks(video_id TEXT PRIMARY KEY,
//!        stream_url TEXT,            -- NULL until first resolution
//!        artist TEXT,
//!        title TEXT NOT NULL,
//!        updated_at TEXT NOT NULL)   -- RFC3339, advanced only on URL change
//! ```
//!
//! `updated_at` is the expiry clock for the stream URL: it moves forward only
//! when a write actually supplies a URL. Metadata-only updates leave it (and
//! the stored URL) untouched, so a title fix never makes a dying URL look
//! fresh again.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// One track known to the proxy.
#[derive(Debug, Clone, Serialize)]
pub struct TrackRecord {
    /// YouTube video ID (11 characters), primary key.
    pub video_id: String,
    /// Last known direct stream URL, if one was ever resolved.
    pub stream_url: Option<String>,
    /// Track title.
    pub title: String,
    /// Track artist, when known.
    pub artist: Option<String>,
    /// Last time `stream_url` was written (RFC3339 in the database).
    pub updated_at: DateTime<Utc>,
}

/// Errors returned by [`TrackStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("track not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot prepare database location: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent track store.
///
/// Every operation takes the connection mutex for the duration of its SQL,
/// which serializes readers and writers. The lock is never held across an
/// await point (the store API is fully synchronous).
#[derive(Debug)]
pub struct TrackStore {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str = "video_id, stream_url, artist, title, updated_at";

impl TrackStore {
    /// Opens (or creates) the store at `path`.
    ///
    /// Parent directories are created if needed, so a default path like
    /// `~/.local/share/ytmproxy/tracks.db` works on first run.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        debug!(path = %path.display(), "Track store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory store. Used by tests and throwaway setups.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tracks (
                video_id TEXT PRIMARY KEY,
                stream_url TEXT,
                artist TEXT,
                title TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Index for cleanup queries on URL age
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tracks_updated_at ON tracks(updated_at)",
            [],
        )?;

        Ok(())
    }

    /// Point lookup by video ID.
    pub fn get(&self, video_id: &str) -> Result<TrackRecord, StoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {SELECT_COLUMNS} FROM tracks WHERE video_id = ?1");

        conn.query_row(&sql, [video_id], row_to_record)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(video_id.to_string()))
    }

    /// Inserts or replaces a track.
    ///
    /// When `stream_url` is a non-empty URL the row is fully replaced and
    /// `updated_at` is stamped to now. When it is `None` (or empty) this is a
    /// metadata-only write: on an existing row only `title` and `artist`
    /// change, while `stream_url` and `updated_at` keep their values.
    pub fn upsert(
        &self,
        video_id: &str,
        stream_url: Option<&str>,
        title: &str,
        artist: Option<&str>,
    ) -> Result<(), StoreError> {
        let url = stream_url.filter(|u| !u.is_empty());
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        match url {
            Some(url) => {
                conn.execute(
                    "INSERT INTO tracks (video_id, stream_url, artist, title, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(video_id) DO UPDATE SET
                         stream_url = excluded.stream_url,
                         artist = excluded.artist,
                         title = excluded.title,
                         updated_at = excluded.updated_at",
                    params![video_id, url, artist, title, now],
                )?;
            }
            None => {
                // The expiry clock must survive metadata-only rewrites, so
                // neither stream_url nor updated_at appear in the UPDATE arm.
                conn.execute(
                    "INSERT INTO tracks (video_id, stream_url, artist, title, updated_at)
                     VALUES (?1, NULL, ?2, ?3, ?4)
                     ON CONFLICT(video_id) DO UPDATE SET
                         artist = excluded.artist,
                         title = excluded.title",
                    params![video_id, artist, title, now],
                )?;
            }
        }

        Ok(())
    }

    /// Replaces the stream URL of an existing track and stamps `updated_at`.
    ///
    /// Unlike [`upsert`](Self::upsert) this never creates a row: refreshing a
    /// URL for an unknown track is a caller bug and surfaces as `NotFound`.
    /// Returns the updated record.
    pub fn update_stream_url(
        &self,
        video_id: &str,
        stream_url: &str,
    ) -> Result<TrackRecord, StoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let affected = conn.execute(
            "UPDATE tracks SET stream_url = ?1, updated_at = ?2 WHERE video_id = ?3",
            params![stream_url, now, video_id],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound(video_id.to_string()));
        }

        let sql = format!("SELECT {SELECT_COLUMNS} FROM tracks WHERE video_id = ?1");
        Ok(conn.query_row(&sql, [video_id], row_to_record)?)
    }

    /// Number of tracks currently stored.
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackRecord> {
    let updated_at: String = row.get(4)?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?
        .with_timezone(&Utc);

    Ok(TrackRecord {
        video_id: row.get(0)?,
        stream_url: row.get(1)?,
        artist: row.get(2)?,
        title: row.get(3)?,
        updated_at,
    })
}
