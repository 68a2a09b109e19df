//! Error taxonomy for store operations.
//!
//! The store raises tagged errors only; the HTTP adapter owns the mapping to
//! status codes. Driver errors funnel through the `From` impls below, which
//! pick out size-limit failures so they can surface as 413 instead of 500.

use thiserror::Error;

/// Errors raised by [`StreamStore`](crate::store::StreamStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The path is absent, or present but past its expiry.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Idempotent put with a conflicting non-content-type attribute.
    #[error("stream already exists with a different {attribute}")]
    StreamConflict { attribute: &'static str },

    /// Append or idempotent put with an incompatible content type.
    #[error("content-type mismatch: expected {expected}, received {received}")]
    ContentTypeMismatch { expected: String, received: String },

    /// Append sequence tag not strictly greater than the last one.
    #[error("sequence conflict: expected {expected}, received {received}")]
    SequenceConflict { expected: String, received: String },

    /// Body failed to parse as JSON or violated the array rules.
    #[error("invalid JSON body: {0}")]
    InvalidJson(String),

    /// Caller supplied an offset whose shape is invalid.
    #[error("invalid offset: {0}")]
    InvalidOffset(String),

    /// The substrate rejected a write with a size-limit failure.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// Any other substrate failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Classify a driver failure: size-limit messages become
    /// [`StoreError::PayloadTooLarge`], everything else is backend trouble.
    pub fn backend<E: std::fmt::Display>(err: E) -> StoreError {
        let message = err.to_string();
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("too large") || lowered.contains("too big") {
            StoreError::PayloadTooLarge(message)
        } else {
            StoreError::Backend(message)
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if matches!(
            err.sqlite_error_code(),
            Some(rusqlite::ErrorCode::TooBig)
        ) {
            return StoreError::PayloadTooLarge(err.to_string());
        }
        StoreError::backend(err)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::backend(err)
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::backend(err)
    }
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        StoreError::backend(err)
    }
}
