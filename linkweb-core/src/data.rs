use crate::model::{SessionId, StreamRecord};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Result store lock poisoned")]
    Poisoned,

    #[error("Result store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Append-only result streams keyed by session.
///
/// A stream whose expiry has passed reads as empty and is deleted, whether or
/// not anyone is still polling it. An expiry may be set before the first
/// record; it then applies to the stream once records arrive.
pub trait ResultStore: Send + Sync {
    /// Appends one record and returns the stream's new length.
    fn append(&self, session: &SessionId, record: &StreamRecord) -> Result<usize>;

    /// Sets the stream to expire `ttl` from now, replacing any earlier expiry.
    fn set_expiry(&self, session: &SessionId, ttl: Duration) -> Result<()>;

    /// Returns every record from index `start` to the current end.
    fn read_range(&self, session: &SessionId, start: usize) -> Result<Vec<StreamRecord>>;

    fn len(&self, session: &SessionId) -> Result<usize>;

    /// Deletes every expired stream and returns how many were removed.
    fn purge_expired(&self) -> Result<usize>;
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_from_now(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_millis().saturating_add(ttl_ms)
}

fn is_expired(expires_at: Option<i64>, now: i64) -> bool {
    matches!(expires_at, Some(at) if at <= now)
}

/// SQLite-backed result streams that survive the process.
pub struct SqliteResultStore {
    conn: Mutex<Connection>,
}

impl SqliteResultStore {
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = SqliteResultStore {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute_batch(
            "
            -- One row per session stream
            CREATE TABLE IF NOT EXISTS result_streams (
                session_id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                expires_at INTEGER          -- unix millis, NULL = no expiry
            );

            CREATE INDEX IF NOT EXISTS idx_result_streams_expiry ON result_streams(expires_at);

            -- Records in append order
            CREATE TABLE IF NOT EXISTS stream_records (
                session_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                kind TEXT NOT NULL CHECK(kind IN ('edge', 'done')),
                payload TEXT NOT NULL,    -- JSON encoded StreamRecord
                PRIMARY KEY (session_id, idx),
                FOREIGN KEY(session_id) REFERENCES result_streams(session_id) ON DELETE CASCADE
            );
            ",
        )?;
        Ok(())
    }

    /// Deletes the stream if it has expired; returns whether it did.
    fn evict_if_expired(conn: &Connection, session: &SessionId, now: i64) -> Result<bool> {
        let expires_at: Option<Option<i64>> = conn
            .query_row(
                "SELECT expires_at FROM result_streams WHERE session_id = ?1",
                params![session.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if is_expired(expires_at.flatten(), now) {
            conn.execute(
                "DELETE FROM result_streams WHERE session_id = ?1",
                params![session.as_str()],
            )?;
            return Ok(true);
        }
        Ok(false)
    }
}

impl ResultStore for SqliteResultStore {
    fn append(&self, session: &SessionId, record: &StreamRecord) -> Result<usize> {
        let payload = serde_json::to_string(record)?;
        let now = now_millis();

        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;

        Self::evict_if_expired(&tx, session, now)?;
        tx.execute(
            "INSERT OR IGNORE INTO result_streams (session_id, created_at) VALUES (?1, ?2)",
            params![session.as_str(), now],
        )?;

        let next: i64 = tx.query_row(
            "SELECT COUNT(*) FROM stream_records WHERE session_id = ?1",
            params![session.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO stream_records (session_id, idx, kind, payload) VALUES (?1, ?2, ?3, ?4)",
            params![session.as_str(), next, record.kind(), payload],
        )?;
        tx.commit()?;

        Ok(next as usize + 1)
    }

    fn set_expiry(&self, session: &SessionId, ttl: Duration) -> Result<()> {
        let now = now_millis();
        let expires_at = expiry_from_now(ttl);

        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Self::evict_if_expired(&conn, session, now)?;
        conn.execute(
            "INSERT INTO result_streams (session_id, created_at, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET expires_at = excluded.expires_at",
            params![session.as_str(), now, expires_at],
        )?;
        Ok(())
    }

    fn read_range(&self, session: &SessionId, start: usize) -> Result<Vec<StreamRecord>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        if Self::evict_if_expired(&conn, session, now_millis())? {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(
            "SELECT payload FROM stream_records WHERE session_id = ?1 AND idx >= ?2 ORDER BY idx",
        )?;
        let start = i64::try_from(start).unwrap_or(i64::MAX);
        let payloads = stmt
            .query_map(params![session.as_str(), start], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let records = payloads
            .iter()
            .map(|payload| serde_json::from_str(payload))
            .collect::<serde_json::Result<Vec<StreamRecord>>>()?;
        Ok(records)
    }

    fn len(&self, session: &SessionId) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        if Self::evict_if_expired(&conn, session, now_millis())? {
            return Ok(0);
        }

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stream_records WHERE session_id = ?1",
            params![session.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn purge_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let removed = conn.execute(
            "DELETE FROM result_streams WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now_millis()],
        )?;
        Ok(removed)
    }
}

#[derive(Debug, Default)]
struct MemoryStream {
    records: Vec<StreamRecord>,
    expires_at: Option<i64>,
}

/// Process-local result streams, for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    streams: Mutex<HashMap<SessionId, MemoryStream>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the map after dropping `session` if it has expired.
    fn lock_evicting(
        &self,
        session: &SessionId,
    ) -> Result<MutexGuard<'_, HashMap<SessionId, MemoryStream>>> {
        let mut streams = self.streams.lock().map_err(|_| StoreError::Poisoned)?;
        if streams
            .get(session)
            .is_some_and(|s| is_expired(s.expires_at, now_millis()))
        {
            streams.remove(session);
        }
        Ok(streams)
    }
}

impl ResultStore for MemoryResultStore {
    fn append(&self, session: &SessionId, record: &StreamRecord) -> Result<usize> {
        let mut streams = self.lock_evicting(session)?;
        let stream = streams.entry(session.clone()).or_default();
        stream.records.push(record.clone());
        Ok(stream.records.len())
    }

    fn set_expiry(&self, session: &SessionId, ttl: Duration) -> Result<()> {
        let mut streams = self.lock_evicting(session)?;
        streams.entry(session.clone()).or_default().expires_at = Some(expiry_from_now(ttl));
        Ok(())
    }

    fn read_range(&self, session: &SessionId, start: usize) -> Result<Vec<StreamRecord>> {
        let streams = self.lock_evicting(session)?;
        Ok(streams
            .get(session)
            .map(|s| s.records.iter().skip(start).cloned().collect())
            .unwrap_or_default())
    }

    fn len(&self, session: &SessionId) -> Result<usize> {
        let streams = self.lock_evicting(session)?;
        Ok(streams.get(session).map_or(0, |s| s.records.len()))
    }

    fn purge_expired(&self) -> Result<usize> {
        let mut streams = self.streams.lock().map_err(|_| StoreError::Poisoned)?;
        let now = now_millis();
        let before = streams.len();
        streams.retain(|_, s| !is_expired(s.expires_at, now));
        Ok(before - streams.len())
    }
}
