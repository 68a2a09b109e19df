//! Object-store substrate.
//!
//! Same two-object layout as the KV substrate, aimed at backends suited to
//! larger blobs: `stream/{encoded}/meta` and `stream/{encoded}/data` behind
//! any [`object_store::ObjectStore`]. Appends are read-modify-write with the
//! data object staged before the metadata object.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
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

/// Stream store backed by an object store.
pub struct ObjectStreamStore {
    client: Arc<dyn ObjectStore>,
    waiters: WaiterRegistry,
    cache: ExistenceCache,
    cursor: CursorOptions,
}

impl ObjectStreamStore {
    pub fn new(client: Arc<dyn ObjectStore>) -> Self {
        Self {
            client,
            waiters: WaiterRegistry::new(),
            cache: ExistenceCache::new(),
            cursor: CursorOptions::default(),
        }
    }

    fn meta_path(path: &str) -> ObjectPath {
        ObjectPath::from(format!("stream/{}/meta", encode_path(path)))
    }

    fn data_path(path: &str) -> ObjectPath {
        ObjectPath::from(format!("stream/{}/data", encode_path(path)))
    }

    async fn fetch(&self, location: &ObjectPath) -> Result<Option<Bytes>, StoreError> {
        match self.client.get(location).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_state(
        &self,
        path: &str,
        meta: &StreamMeta,
        data: Vec<u8>,
    ) -> Result<(), StoreError> {
        // Data first: the metadata object is the commit point.
        self.client
            .put(&Self::data_path(path), PutPayload::from(data))
            .await?;
        let encoded =
            serde_json::to_vec(meta).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.client
            .put(&Self::meta_path(path), PutPayload::from(encoded))
            .await?;
        Ok(())
    }

    async fn remove_state(&self, path: &str) -> Result<bool, StoreError> {
        // Metadata first so readers observe absence immediately.
        let removed = match self.client.delete(&Self::meta_path(path)).await {
            Ok(()) => true,
            Err(object_store::Error::NotFound { .. }) => false,
            Err(e) => return Err(e.into()),
        };
        match self.client.delete(&Self::data_path(path)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(removed)
    }

    /// Load the live state, tombstoning it first if its expiry elapsed.
    async fn load_live(&self, path: &str) -> Result<Option<(StreamMeta, Vec<u8>)>, StoreError> {
        let Some(raw_meta) = self.fetch(&Self::meta_path(path)).await? else {
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
        let mut data = self
            .fetch(&Self::data_path(path))
            .await?
            .map(|b| b.to_vec())
            .unwrap_or_default();
        // The data object may be ahead of the metadata (crashed writer).
        data.truncate(meta.next().pos as usize);
        Ok(Some((meta, data)))
    }

    fn parse_offset(offset: Option<&str>) -> Result<Offset, StoreError> {
        let raw = offset.unwrap_or(crate::offset::SENTINEL_OFFSET);
        Offset::normalize(raw).ok_or_else(|| StoreError::InvalidOffset(raw.to_string()))
    }
}

#[async_trait]
impl StreamStore for ObjectStreamStore {
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
        self.write_state(path, &meta, buffer).await?;
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
        self.write_state(path, &updated, merged.clone()).await?;
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
