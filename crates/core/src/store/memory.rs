//! In-process substrate.
//!
//! The reference implementation: one map guarded by a single lock, with every
//! check-and-mutate sequence inside one critical section. The other
//! substrates must match the semantics observable here.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::cursor::CursorOptions;
use crate::error::StoreError;
use crate::etag::format_etag;
use crate::offset::Offset;
use crate::store::helpers;
use crate::store::waiters::WaiterRegistry;
use crate::store::StreamStore;
use crate::types::{
    AppendOptions, HeadResult, PutOptions, PutOutcome, ReadResult, StreamMessage, StreamMeta,
    WaitResult,
};

struct MemoryStream {
    meta: StreamMeta,
    buffer: Vec<u8>,
}

/// In-memory stream store.
#[derive(Default)]
pub struct MemoryStreamStore {
    streams: RwLock<HashMap<String, MemoryStream>>,
    waiters: WaiterRegistry,
    cursor: CursorOptions,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tombstone the stream if its expiry has elapsed, resolving waiters.
    fn expire_if_elapsed(&self, path: &str) {
        let mut streams = self.streams.write();
        if streams.get(path).is_some_and(|s| s.meta.is_expired()) {
            streams.remove(path);
            drop(streams);
            info!(path = %path, "expired stream removed");
            self.waiters.notify_delete(path);
        }
    }

    fn parse_offset(offset: Option<&str>) -> Result<Offset, StoreError> {
        let raw = offset.unwrap_or(crate::offset::SENTINEL_OFFSET);
        Offset::normalize(raw).ok_or_else(|| StoreError::InvalidOffset(raw.to_string()))
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn put(&self, path: &str, options: PutOptions) -> Result<PutOutcome, StoreError> {
        self.expire_if_elapsed(path);
        let mut streams = self.streams.write();
        if let Some(existing) = streams.get(path) {
            helpers::check_idempotent_create(&existing.meta, &options)?;
            return Ok(PutOutcome {
                created: false,
                next_offset: existing.meta.next_offset.clone(),
            });
        }
        let (buffer, append_count) =
            helpers::prepare_initial_data(&options.content_type, options.data.as_deref())?;
        let mut meta = StreamMeta::new(options.content_type, append_count, buffer.len() as u64);
        meta.ttl_seconds = options.ttl_seconds;
        meta.expires_at = options.expires_at;
        let next_offset = meta.next_offset.clone();
        streams.insert(path.to_string(), MemoryStream { meta, buffer });
        info!(path = %path, "created stream");
        Ok(PutOutcome {
            created: true,
            next_offset,
        })
    }

    async fn append(
        &self,
        path: &str,
        data: Vec<u8>,
        options: AppendOptions,
    ) -> Result<String, StoreError> {
        self.expire_if_elapsed(path);
        let mut streams = self.streams.write();
        let stream = streams
            .get_mut(path)
            .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
        let (merged, updated) =
            helpers::apply_append(&stream.meta, &stream.buffer, &data, &options)?;
        stream.buffer = merged;
        stream.meta = updated;
        let next_offset = stream.meta.next_offset.clone();
        // Notify while still inside the critical section so no concurrent
        // enrollment can observe the new buffer without being resolved.
        self.waiters.notify_append(path, &stream.buffer);
        debug!(path = %path, offset = %next_offset, "appended to stream");
        Ok(next_offset)
    }

    async fn get(&self, path: &str, offset: Option<&str>) -> Result<ReadResult, StoreError> {
        let offset = Self::parse_offset(offset)?;
        self.expire_if_elapsed(path);
        let streams = self.streams.read();
        let stream = streams
            .get(path)
            .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
        Ok(helpers::snapshot_read(
            path,
            &stream.meta,
            &stream.buffer,
            offset,
            &self.cursor,
        ))
    }

    async fn head(&self, path: &str) -> Result<HeadResult, StoreError> {
        self.expire_if_elapsed(path);
        let streams = self.streams.read();
        let stream = streams
            .get(path)
            .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
        Ok(HeadResult {
            content_type: stream.meta.content_type.clone(),
            next_offset: stream.meta.next_offset.clone(),
            etag: format_etag(
                path,
                &Offset::INITIAL.to_string(),
                &stream.meta.next_offset,
            ),
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let removed = self.streams.write().remove(path).is_some();
        if removed {
            info!(path = %path, "deleted stream");
        }
        self.waiters.notify_delete(path);
        Ok(())
    }

    async fn has(&self, path: &str) -> bool {
        self.streams
            .read()
            .get(path)
            .is_some_and(|s| !s.meta.is_expired())
    }

    async fn wait_for_data(
        &self,
        path: &str,
        offset: &str,
        timeout_ms: u64,
    ) -> Result<WaitResult, StoreError> {
        let offset =
            Offset::normalize(offset).ok_or_else(|| StoreError::InvalidOffset(offset.to_string()))?;
        self.expire_if_elapsed(path);
        let handle = {
            let streams = self.streams.read();
            let stream = streams
                .get(path)
                .ok_or_else(|| StoreError::StreamNotFound(path.to_string()))?;
            if (offset.pos as usize) < stream.buffer.len() {
                return Ok(WaitResult {
                    messages: vec![helpers::immediate_wait_message(&stream.buffer, offset)],
                    timed_out: false,
                });
            }
            // Enrolled under the stream lock: a concurrent append cannot
            // commit between the check above and this push.
            self.waiters.enroll(path, offset)
        };
        Ok(self.waiters.wait(path, handle, timeout_ms).await)
    }

    fn format_response(&self, path: &str, messages: &[StreamMessage]) -> Vec<u8> {
        let streams = self.streams.read();
        let content_type = streams
            .get(path)
            .filter(|s| !s.meta.is_expired())
            .map(|s| s.meta.content_type.clone());
        helpers::format_messages(content_type.as_deref(), messages)
    }
}
