//! Core types shared by every substrate and the HTTP adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::offset::Offset;

/// A chunk of stream data handed back to a reader.
///
/// Snapshot reads and waiter resolutions always synthesize a single message
/// covering everything after the requested offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Raw bytes in the stream's internal representation.
    pub data: Vec<u8>,
    /// The offset this message starts at (the reader's request offset).
    pub offset: String,
    /// When the message was synthesized (milliseconds since epoch).
    pub timestamp: i64,
}

/// Stream metadata, persisted alongside the data by every substrate.
///
/// Field names double as the KV/object-store JSON layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMeta {
    /// MIME type fixed at creation.
    pub content_type: String,
    /// Relative TTL in seconds, mutually exclusive with `expires_at`.
    pub ttl_seconds: Option<u64>,
    /// Absolute expiry timestamp, mutually exclusive with `ttl_seconds`.
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation timestamp (milliseconds since epoch).
    pub created_at: i64,
    /// Canonical offset of the next append.
    pub next_offset: String,
    /// Number of committed appends. Always the high half of `next_offset`.
    pub append_count: u64,
    /// Monotonic tag of the most recent append that carried one.
    pub last_seq: Option<String>,
}

impl StreamMeta {
    /// Metadata for a freshly created stream holding `buffer`.
    pub fn new(content_type: String, append_count: u64, buffer_len: u64) -> Self {
        StreamMeta {
            content_type,
            ttl_seconds: None,
            expires_at: None,
            created_at: Utc::now().timestamp_millis(),
            next_offset: Offset {
                seq: append_count,
                pos: buffer_len,
            }
            .to_string(),
            append_count,
            last_seq: None,
        }
    }

    /// The parsed form of `next_offset`.
    pub fn next(&self) -> Offset {
        Offset::parse(&self.next_offset).unwrap_or(Offset::INITIAL)
    }

    /// Whether this stream uses the JSON concatenation convention.
    pub fn is_json(&self) -> bool {
        is_json_content_type(&self.content_type)
    }

    /// Whether the stream's expiry has elapsed. Expired streams are treated
    /// as absent and removed on the next lookup.
    pub fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at {
            return Utc::now() >= expires_at;
        }
        if let Some(ttl_seconds) = self.ttl_seconds {
            let expiry = self.created_at + ttl_seconds as i64 * 1000;
            return Utc::now().timestamp_millis() >= expiry;
        }
        false
    }
}

/// Attributes for `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Content type of the stream. The HTTP adapter defaults this to
    /// `application/octet-stream`.
    pub content_type: String,
    pub ttl_seconds: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional initial payload, stored as the first append.
    pub data: Option<Vec<u8>>,
}

/// Attributes for `append`.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Declared content type; must match the stream's when present.
    pub content_type: Option<String>,
    /// Opaque monotonic token for writer coordination.
    pub seq: Option<String>,
}

/// Result of `put`.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// True when the stream did not exist before this call.
    pub created: bool,
    pub next_offset: String,
}

/// Result of a snapshot `get`.
#[derive(Debug, Clone)]
pub struct ReadResult {
    /// Zero or one message covering everything past the request offset.
    pub messages: Vec<StreamMessage>,
    pub next_offset: String,
    /// Snapshot reads are always up to date.
    pub up_to_date: bool,
    /// Current cursor interval number.
    pub cursor: String,
    /// Identity of this exact (path, start, end) snapshot.
    pub etag: String,
    pub content_type: String,
}

/// Result of `head`.
#[derive(Debug, Clone)]
pub struct HeadResult {
    pub content_type: String,
    pub next_offset: String,
    pub etag: String,
}

/// Result of `wait_for_data`: either new data or a timeout. Empty messages
/// without a timeout means the stream was deleted while waiting.
#[derive(Debug, Clone)]
pub struct WaitResult {
    pub messages: Vec<StreamMessage>,
    pub timed_out: bool,
}

/// Server configuration options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Port to listen on (0 for auto-assign).
    pub port: u16,
    /// Host to bind to.
    pub host: String,
    /// Long-poll and SSE wait-cycle timeout in milliseconds.
    pub long_poll_timeout_ms: u64,
    /// Cursor interval in seconds.
    pub cursor_interval_seconds: u64,
    /// Cursor epoch for interval calculation.
    pub cursor_epoch: DateTime<Utc>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 4437,
            host: "127.0.0.1".to_string(),
            long_poll_timeout_ms: 30_000,
            cursor_interval_seconds: 20,
            // October 9, 2024 as default epoch
            cursor_epoch: DateTime::parse_from_rfc3339("2024-10-09T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }
}

/// Normalize a content type: lowercase, parameters stripped.
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

/// Whether a content type selects the JSON concatenation convention.
pub fn is_json_content_type(content_type: &str) -> bool {
    let normalized = normalize_content_type(content_type);
    normalized == "application/json" || normalized.ends_with("+json")
}
