//! The `StreamStore` contract and its substrate implementations.
//!
//! Every substrate exposes the same capability set; they differ only in
//! storage backing and physical layout. Format and validation decisions live
//! in the shared helpers, waiter bookkeeping in the per-instance registry.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{
    AppendOptions, HeadResult, PutOptions, PutOutcome, ReadResult, StreamMessage, WaitResult,
};

pub mod helpers;
pub mod memory;
pub mod object;
pub mod postgres;
pub mod redis;
pub mod sqlite;

pub(crate) mod cache;
pub(crate) mod waiters;

pub use memory::MemoryStreamStore;
pub use object::ObjectStreamStore;
pub use postgres::PostgresStreamStore;
pub use redis::RedisStreamStore;
pub use sqlite::SqliteStreamStore;

/// The uniform contract over every storage substrate.
///
/// Streams are append-only byte sequences addressed by offset. All
/// implementations guarantee the same observable semantics: offsets grow
/// monotonically, content types are fixed at creation, expired streams read
/// as absent, and waiters resolve exactly once.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Create the stream if absent; otherwise run the idempotent-create
    /// check and report `created: false`.
    async fn put(&self, path: &str, options: PutOptions) -> Result<PutOutcome, StoreError>;

    /// Append bytes, validating content type and sequence tag, then notify
    /// waiters. Fails with `StreamNotFound` when absent or expired.
    async fn append(
        &self,
        path: &str,
        data: Vec<u8>,
        options: AppendOptions,
    ) -> Result<String, StoreError>;

    /// Snapshot read from `offset` (defaults to the initial offset; the
    /// sentinel `-1` is accepted).
    async fn get(&self, path: &str, offset: Option<&str>) -> Result<ReadResult, StoreError>;

    /// Metadata-only read.
    async fn head(&self, path: &str) -> Result<HeadResult, StoreError>;

    /// Remove the stream and resolve its waiters with an empty result.
    /// Idempotent: deleting an absent stream succeeds.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Existence hint. Exact for the in-memory and embedded substrates;
    /// cache-backed for substrates whose source of truth is remote.
    async fn has(&self, path: &str) -> bool;

    /// Wait until data exists past `offset`, the stream is deleted, or
    /// `timeout_ms` elapses. Returns immediately when data is already
    /// present.
    async fn wait_for_data(
        &self,
        path: &str,
        offset: &str,
        timeout_ms: u64,
    ) -> Result<WaitResult, StoreError>;

    /// Frame messages for the wire: JSON streams wrap into an array, raw
    /// streams concatenate. Unknown streams format to zero bytes.
    fn format_response(&self, path: &str, messages: &[StreamMessage]) -> Vec<u8>;
}
