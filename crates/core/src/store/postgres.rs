//! Relational substrate.
//!
//! Same table shape as the embedded row-store, but every operation is an
//! async prepared statement against Postgres. Mutation assumes at most one
//! writer per path (the deployment invariant for this substrate); waiter
//! bookkeeping is still in-process, so live tailing only observes appends
//! made through this instance.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use tracing::{debug, info, warn};

use crate::cursor::CursorOptions;
use crate::error::StoreError;
use crate::etag::format_etag;
use crate::offset::Offset;
use crate::store::StreamStore;
use crate::store::cache::ExistenceCache;
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
    ttl_seconds   BIGINT,
    expires_at    TIMESTAMPTZ,
    created_at    BIGINT NOT NULL,
    data          BYTEA NOT NULL,
    next_offset   TEXT NOT NULL,
    last_seq      TEXT,
    append_count  BIGINT NOT NULL
)";

/// Stream store backed by a relational database.
pub struct PostgresStreamStore {
    pool: PgPool,
    waiters: WaiterRegistry,
    cache: ExistenceCache,
    cursor: CursorOptions,
}

impl PostgresStreamStore {
    /// Connect and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self {
            pool,
            waiters: WaiterRegistry::new(),
            cache: ExistenceCache::new(),
            cursor: CursorOptions::default(),
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_state(row: PgRow) -> (StreamMeta, Vec<u8>) {
        (
            StreamMeta {
                content_type: row.get("content_type"),
                ttl_seconds: row.get::<Option<i64>, _>("ttl_seconds").map(|v| v as u64),
                expires_at: row.get("expires_at"),
                created_at: row.get("created_at"),
                next_offset: row.get("next_offset"),
                last_seq: row.get("last_seq"),
                append_count: row.get::<i64, _>("append_count") as u64,
            },
            row.get("data"),
        )
    }

    /// Load the live row, tombstoning it first if its expiry elapsed. The
    /// garbage-collection delete is best-effort and never fails the caller.
    async fn load_live(&self, path: &str) -> Result<Option<(StreamMeta, Vec<u8>)>, StoreError> {
        let row = sqlx::query(
            "SELECT content_type, ttl_seconds, expires_at, created_at, data,
                    next_offset, last_seq, append_count
             FROM streams WHERE path = $1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        match row.map(Self::row_to_state) {
            Some((meta, _)) if meta.is_expired() => {
                if let Err(e) = sqlx::query("DELETE FROM streams WHERE path = $1")
                    .bind(path)
                    .execute(&self.pool)
                    .await
                {
                    warn!(path = %path, error = %e, "failed to remove expired stream");
                }
                info!(path = %path, "expired stream removed");
                self.cache.forget(path);
                self.waiters.notify_delete(path);
                Ok(None)
            }
            state => Ok(state),
        }
    }

    fn parse_offset(offset: Option<&str>) -> Result<Offset, StoreError> {
        let raw = offset.unwrap_or(crate::offset::SENTINEL_OFFSET);
        Offset::normalize(raw).ok_or_else(|| StoreError::InvalidOffset(raw.to_string()))
    }
}

#[async_trait]
impl StreamStore for PostgresStreamStore {
    async fn put(&self, path: &str, options: PutOptions) -> Result<PutOutcome, StoreError> {
        if let Some((meta, _)) = self.load_live(path).await? {
            helpers::check_idempotent_create(&meta, &options)?;
            self.cache.record(path, &meta.content_type);
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
        sqlx::query(
            "INSERT INTO streams (path, content_type, ttl_seconds, expires_at, created_at,
                                  data, next_offset, last_seq, append_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(path)
        .bind(&meta.content_type)
        .bind(meta.ttl_seconds.map(|v| v as i64))
        .bind(meta.expires_at)
        .bind(meta.created_at)
        .bind(&buffer)
        .bind(&meta.next_offset)
        .bind(&meta.last_seq)
        .bind(meta.append_count as i64)
        .execute(&self.pool)
        .await?;
        self.cache.record(path, &meta.content_type);
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
        let (meta, buffer) = self
            .load_live(path)
            .await?
            .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
        let (merged, updated) = helpers::apply_append(&meta, &buffer, &data, &options)?;
        sqlx::query(
            "UPDATE streams SET data = $2, next_offset = $3, last_seq = $4, append_count = $5
             WHERE path = $1",
        )
        .bind(path)
        .bind(&merged)
        .bind(&updated.next_offset)
        .bind(&updated.last_seq)
        .bind(updated.append_count as i64)
        .execute(&self.pool)
        .await?;
        self.cache.record(path, &updated.content_type);
        self.waiters.notify_append(path, &merged);
        debug!(path = %path, offset = %updated.next_offset, "appended to stream");
        Ok(updated.next_offset)
    }

    async fn get(&self, path: &str, offset: Option<&str>) -> Result<ReadResult, StoreError> {
        let offset = Self::parse_offset(offset)?;
        let (meta, buffer) = self
            .load_live(path)
            .await?
            .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
        self.cache.record(path, &meta.content_type);
        Ok(helpers::snapshot_read(
            path,
            &meta,
            &buffer,
            offset,
            &self.cursor,
        ))
    }

    async fn head(&self, path: &str) -> Result<HeadResult, StoreError> {
        let (meta, _) = self
            .load_live(path)
            .await?
            .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
        self.cache.record(path, &meta.content_type);
        Ok(HeadResult {
            content_type: meta.content_type.clone(),
            next_offset: meta.next_offset.clone(),
            etag: format_etag(path, &Offset::INITIAL.to_string(), &meta.next_offset),
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM streams WHERE path = $1")
            .bind(path)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            info!(path = %path, "deleted stream");
        }
        self.cache.forget(path);
        self.waiters.notify_delete(path);
        Ok(())
    }

    /// Cache-only: truthful once this instance has observed the stream, and
    /// never worth a round trip on its own. Callers must treat it as a hint.
    async fn has(&self, path: &str) -> bool {
        self.cache.contains(path)
    }

    async fn wait_for_data(
        &self,
        path: &str,
        offset: &str,
        timeout_ms: u64,
    ) -> Result<WaitResult, StoreError> {
        let offset = Offset::normalize(offset)
            .ok_or_else(|| StoreError::InvalidOffset(offset.to_string()))?;
        let (_, buffer) = self
            .load_live(path)
            .await?
            .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
        if (offset.pos as usize) < buffer.len() {
            return Ok(WaitResult {
                messages: vec![helpers::immediate_wait_message(&buffer, offset)],
                timed_out: false,
            });
        }
        let handle = self.waiters.enroll(path, offset);
        // The check above ran outside any critical section; re-check now
        // that we are enrolled so an interleaved append cannot be missed.
        match self.load_live(path).await {
            Ok(Some((_, buffer))) if (offset.pos as usize) < buffer.len() => {
                self.waiters.remove(path, handle.id());
                return Ok(WaitResult {
                    messages: vec![helpers::immediate_wait_message(&buffer, offset)],
                    timed_out: false,
                });
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => {
                self.waiters.remove(path, handle.id());
                return Ok(WaitResult {
                    messages: Vec::new(),
                    timed_out: false,
                });
            }
        }
        Ok(self.waiters.wait(path, handle, timeout_ms).await)
    }

    fn format_response(&self, path: &str, messages: &[StreamMessage]) -> Vec<u8> {
        helpers::format_messages(self.cache.content_type(path).as_deref(), messages)
    }
}
