//! KV substrate.
//!
//! Two keys per stream: `stream:{encoded}:meta` holds the JSON-encoded
//! metadata record, `stream:{encoded}:data` the raw bytes. The data write is
//! staged before the metadata write, so a reader combining both never sees a
//! next offset pointing past the bytes it can fetch; the data key may run
//! ahead of the metadata after a crash, which readers hide by truncating to
//! the metadata byte position.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{debug, info, warn};

use crate::cursor::CursorOptions;
use crate::error::StoreError;
use crate::etag::format_etag;
use crate::offset::Offset;
use crate::path_encoding::encode_path;
use crate::store::StreamStore;
use crate::store::cache::ExistenceCache;
use crate::store::helpers;
use crate::store::waiters::WaiterRegistry;
use crate::types::{
    AppendOptions, HeadResult, PutOptions, PutOutcome, ReadResult, StreamMessage, StreamMeta,
    WaitResult,
};

/// Stream store backed by a Redis-style KV service.
pub struct RedisStreamStore {
    conn: MultiplexedConnection,
    waiters: WaiterRegistry,
    cache: ExistenceCache,
    cursor: CursorOptions,
}

impl RedisStreamStore {
    /// Connect to the KV service.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(StoreError::from)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self {
            conn,
            waiters: WaiterRegistry::new(),
            cache: ExistenceCache::new(),
            cursor: CursorOptions::default(),
        })
    }

    fn meta_key(path: &str) -> String {
        format!("stream:{}:meta", encode_path(path))
    }

    fn data_key(path: &str) -> String {
        format!("stream:{}:data", encode_path(path))
    }

    async fn write_state(
        &self,
        path: &str,
        meta: &StreamMeta,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        // Data first: the metadata is the commit point.
        let _: () = conn.set(Self::data_key(path), data).await?;
        let encoded =
            serde_json::to_vec(meta).map_err(|e| StoreError::Backend(e.to_string()))?;
        let _: () = conn.set(Self::meta_key(path), encoded).await?;
        Ok(())
    }

    async fn remove_state(&self, path: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // Metadata first so readers observe absence immediately.
        let removed: i64 = conn.del(Self::meta_key(path)).await?;
        let _: () = conn.del(Self::data_key(path)).await?;
        Ok(removed > 0)
    }

    /// Load the live state, tombstoning it first if its expiry elapsed.
    async fn load_live(&self, path: &str) -> Result<Option<(StreamMeta, Vec<u8>)>, StoreError> {
        let mut conn = self.conn.clone();
        let raw_meta: Option<Vec<u8>> = conn.get(Self::meta_key(path)).await?;
        let Some(raw_meta) = raw_meta else {
            return Ok(None);
        };
        let meta: StreamMeta = serde_json::from_slice(&raw_meta)
            .map_err(|e| StoreError::Backend(format!("corrupt stream metadata: {e}")))?;
        if meta.is_expired() {
            if let Err(e) = self.remove_state(path).await {
                warn!(path = %path, error = %e, "failed to remove expired stream");
            }
            info!(path = %path, "expired stream removed");
            self.cache.forget(path);
            self.waiters.notify_delete(path);
            return Ok(None);
        }
        let data: Option<Vec<u8>> = conn.get(Self::data_key(path)).await?;
        let mut data = data.unwrap_or_default();
        // The data key may be ahead of the metadata (crashed writer); the
        // metadata byte position is the commit point.
        data.truncate(meta.next().pos as usize);
        Ok(Some((meta, data)))
    }

    fn parse_offset(offset: Option<&str>) -> Result<Offset, StoreError> {
        let raw = offset.unwrap_or(crate::offset::SENTINEL_OFFSET);
        Offset::normalize(raw).ok_or_else(|| StoreError::InvalidOffset(raw.to_string()))
    }
}

#[async_trait]
impl StreamStore for RedisStreamStore {
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
        self.write_state(path, &meta, &buffer).await?;
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
        // Grow the data key in place, then commit via the metadata.
        let mut conn = self.conn.clone();
        let _: () = conn
            .append(Self::data_key(path), &merged[buffer.len()..])
            .await?;
        let encoded =
            serde_json::to_vec(&updated).map_err(|e| StoreError::Backend(e.to_string()))?;
        let _: () = conn.set(Self::meta_key(path), encoded).await?;
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
        if self.remove_state(path).await? {
            info!(path = %path, "deleted stream");
        }
        self.cache.forget(path);
        self.waiters.notify_delete(path);
        Ok(())
    }

    /// Cache-hinted: truthful once this instance has observed the stream.
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
        // Re-check after enrolling so an append between the first read and
        // the enrollment cannot be missed.
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
