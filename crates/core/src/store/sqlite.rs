//! Embedded row-store substrate.
//!
//! One SQLite table holds everything; the connection mutex is the per-store
//! single-writer guarantee, so every operation runs as one critical section
//! exactly like the in-memory reference. `next_offset` is stored redundantly
//! for cheap metadata reads.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::cursor::CursorOptions;
use crate::error::StoreError;
use crate::etag::format_etag;
use crate::offset::Offset;
use crate::store::StreamStore;
use crate::store::helpers;
use crate::store::waiters::WaiterRegistry;
use crate::types::{
    AppendOptions, HeadResult, PutOptions, PutOutcome, ReadResult, StreamMessage, StreamMeta,
    WaitResult,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS streams (
    path          TEXT PRIMARY KEY,
    content_type  TEXT NOT NULL,
    ttl_seconds   INTEGER,
    expires_at    TEXT,
    created_at    INTEGER NOT NULL,
    data          BLOB NOT NULL,
    next_offset   TEXT NOT NULL,
    last_seq      TEXT,
    append_count  INTEGER NOT NULL
)";

/// Stream store backed by an embedded SQLite database.
pub struct SqliteStreamStore {
    conn: Mutex<Connection>,
    waiters: WaiterRegistry,
    cursor: CursorOptions,
}

impl SqliteStreamStore {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// A private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
            waiters: WaiterRegistry::new(),
            cursor: CursorOptions::default(),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create the schema.
    fn initialize(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn load_row(
        conn: &Connection,
        path: &str,
    ) -> Result<Option<(StreamMeta, Vec<u8>)>, StoreError> {
        conn.query_row(
            "SELECT content_type, ttl_seconds, expires_at, created_at, data,
                    next_offset, last_seq, append_count
             FROM streams WHERE path = ?1",
            params![path],
            |row| {
                let expires_at: Option<String> = row.get(2)?;
                Ok((
                    StreamMeta {
                        content_type: row.get(0)?,
                        ttl_seconds: row.get::<_, Option<i64>>(1)?.map(|v| v as u64),
                        expires_at: expires_at.and_then(|s| {
                            DateTime::parse_from_rfc3339(&s)
                                .ok()
                                .map(|dt| dt.with_timezone(&Utc))
                        }),
                        created_at: row.get(3)?,
                        next_offset: row.get(5)?,
                        last_seq: row.get(6)?,
                        append_count: row.get::<_, i64>(7)? as u64,
                    },
                    row.get::<_, Vec<u8>>(4)?,
                ))
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Load the live row, tombstoning it first if its expiry elapsed.
    fn load_live(
        &self,
        conn: &MutexGuard<'_, Connection>,
        path: &str,
    ) -> Result<Option<(StreamMeta, Vec<u8>)>, StoreError> {
        match Self::load_row(conn, path)? {
            Some((meta, _)) if meta.is_expired() => {
                conn.execute("DELETE FROM streams WHERE path = ?1", params![path])?;
                info!(path = %path, "expired stream removed");
                self.waiters.notify_delete(path);
                Ok(None)
            }
            row => Ok(row),
        }
    }

    fn parse_offset(offset: Option<&str>) -> Result<Offset, StoreError> {
        let raw = offset.unwrap_or(crate::offset::SENTINEL_OFFSET);
        Offset::normalize(raw).ok_or_else(|| StoreError::InvalidOffset(raw.to_string()))
    }
}

#[async_trait]
impl StreamStore for SqliteStreamStore {
    async fn put(&self, path: &str, options: PutOptions) -> Result<PutOutcome, StoreError> {
        let conn = self.conn.lock();
        if let Some((meta, _)) = self.load_live(&conn, path)? {
            helpers::check_idempotent_create(&meta, &options)?;
            return Ok(PutOutcome {
                created: false,
                next_offset: meta.next_offset,
            });
        }
        let (buffer, append_count) =
            helpers::prepare_initial_data(&options.content_type, options.data.as_deref())?;
        let mut meta = StreamMeta::new(
            options.content_type.clone(),
            append_count,
            buffer.len() as u64,
        );
        meta.ttl_seconds = options.ttl_seconds;
        meta.expires_at = options.expires_at;
        conn.execute(
            "INSERT INTO streams (path, content_type, ttl_seconds, expires_at, created_at,
                                  data, next_offset, last_seq, append_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                path,
                meta.content_type,
                meta.ttl_seconds.map(|v| v as i64),
                meta.expires_at.map(|dt| dt.to_rfc3339()),
                meta.created_at,
                buffer,
                meta.next_offset,
                meta.last_seq,
                meta.append_count as i64,
            ],
        )?;
        info!(path = %path, "created stream");
        Ok(PutOutcome {
            created: true,
            next_offset: meta.next_offset,
        })
    }

    async fn append(
        &self,
        path: &str,
        data: Vec<u8>,
        options: AppendOptions,
    ) -> Result<String, StoreError> {
        let conn = self.conn.lock();
        let (meta, buffer) = self
            .load_live(&conn, path)?
            .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
        let (merged, updated) = helpers::apply_append(&meta, &buffer, &data, &options)?;
        conn.execute(
            "UPDATE streams SET data = ?2, next_offset = ?3, last_seq = ?4, append_count = ?5
             WHERE path = ?1",
            params![
                path,
                merged,
                updated.next_offset,
                updated.last_seq,
                updated.append_count as i64,
            ],
        )?;
        // Waiter enrollment also runs under the connection mutex, so this
        // notify observes every waiter enrolled before the commit.
        self.waiters.notify_append(path, &merged);
        debug!(path = %path, offset = %updated.next_offset, "appended to stream");
        Ok(updated.next_offset)
    }

    async fn get(&self, path: &str, offset: Option<&str>) -> Result<ReadResult, StoreError> {
        let offset = Self::parse_offset(offset)?;
        let conn = self.conn.lock();
        let (meta, buffer) = self
            .load_live(&conn, path)?
            .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
        Ok(helpers::snapshot_read(
            path,
            &meta,
            &buffer,
            offset,
            &self.cursor,
        ))
    }

    async fn head(&self, path: &str) -> Result<HeadResult, StoreError> {
        let conn = self.conn.lock();
        let (meta, _) = self
            .load_live(&conn, path)?
            .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
        Ok(HeadResult {
            content_type: meta.content_type.clone(),
            next_offset: meta.next_offset.clone(),
            etag: format_etag(path, &Offset::INITIAL.to_string(), &meta.next_offset),
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM streams WHERE path = ?1", params![path])?;
        if removed > 0 {
            info!(path = %path, "deleted stream");
        }
        self.waiters.notify_delete(path);
        Ok(())
    }

    async fn has(&self, path: &str) -> bool {
        let conn = self.conn.lock();
        matches!(Self::load_row(&conn, path), Ok(Some((meta, _))) if !meta.is_expired())
    }

    async fn wait_for_data(
        &self,
        path: &str,
        offset: &str,
        timeout_ms: u64,
    ) -> Result<WaitResult, StoreError> {
        let offset = Offset::normalize(offset)
            .ok_or_else(|| StoreError::InvalidOffset(offset.to_string()))?;
        let handle = {
            let conn = self.conn.lock();
            let (_, buffer) = self
                .load_live(&conn, path)?
                .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
            if (offset.pos as usize) < buffer.len() {
                return Ok(WaitResult {
                    messages: vec![helpers::immediate_wait_message(&buffer, offset)],
                    timed_out: false,
                });
            }
            self.waiters.enroll(path, offset)
        };
        Ok(self.waiters.wait(path, handle, timeout_ms).await)
    }

    fn format_response(&self, path: &str, messages: &[StreamMessage]) -> Vec<u8> {
        let conn = self.conn.lock();
        let content_type = match Self::load_row(&conn, path) {
            Ok(Some((meta, _))) if !meta.is_expired() => Some(meta.content_type),
            _ => None,
        };
        helpers::format_messages(content_type.as_deref(), messages)
    }
}
