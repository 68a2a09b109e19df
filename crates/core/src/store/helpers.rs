//! Shared substrate logic.
//!
//! Every substrate delegates its format and validation decisions here so the
//! five implementations differ only in storage backing. All helpers are free
//! functions over primitive inputs.

use chrono::Utc;

use crate::cursor::{CursorOptions, calculate_cursor};
use crate::error::StoreError;
use crate::etag::format_etag;
use crate::json;
use crate::offset::Offset;
use crate::types::{
    AppendOptions, PutOptions, ReadResult, StreamMessage, StreamMeta, is_json_content_type,
    normalize_content_type,
};

/// Check an idempotent `put` against the existing stream.
///
/// A different normalized content type is a content-type mismatch; a
/// different TTL (strict equality, absent counts) or expiry is a stream
/// conflict. Matching attributes mean "already present, not created".
pub fn check_idempotent_create(
    existing: &StreamMeta,
    request: &PutOptions,
) -> Result<(), StoreError> {
    if normalize_content_type(&existing.content_type)
        != normalize_content_type(&request.content_type)
    {
        return Err(StoreError::ContentTypeMismatch {
            expected: existing.content_type.clone(),
            received: request.content_type.clone(),
        });
    }
    if existing.ttl_seconds != request.ttl_seconds {
        return Err(StoreError::StreamConflict { attribute: "TTL" });
    }
    if existing.expires_at != request.expires_at {
        return Err(StoreError::StreamConflict {
            attribute: "expires-at",
        });
    }
    Ok(())
}

/// Prepare the initial buffer for a new stream.
///
/// JSON bodies are validated and re-serialized into the internal form (an
/// empty array stores nothing); raw bodies are taken as-is. Returns the
/// buffer and the initial append count (1 iff the buffer is non-empty).
pub fn prepare_initial_data(
    content_type: &str,
    data: Option<&[u8]>,
) -> Result<(Vec<u8>, u64), StoreError> {
    let buffer = match data {
        None => Vec::new(),
        Some(body) if is_json_content_type(content_type) => {
            json::stitch_items(&json::parse_items(body, true)?)
        }
        Some(body) => body.to_vec(),
    };
    let append_count = if buffer.is_empty() { 0 } else { 1 };
    Ok((buffer, append_count))
}

/// A declared append content type must match the stream's.
pub fn validate_append_content_type(
    stream_content_type: &str,
    declared: Option<&str>,
) -> Result<(), StoreError> {
    if let Some(declared) = declared {
        if normalize_content_type(declared) != normalize_content_type(stream_content_type) {
            return Err(StoreError::ContentTypeMismatch {
                expected: stream_content_type.to_string(),
                received: declared.to_string(),
            });
        }
    }
    Ok(())
}

/// An append sequence tag must be strictly greater (string order) than the
/// last accepted one. Appends without a tag are always admitted.
pub fn validate_append_seq(
    last_seq: Option<&str>,
    seq: Option<&str>,
) -> Result<(), StoreError> {
    if let (Some(last), Some(seq)) = (last_seq, seq) {
        if seq <= last {
            return Err(StoreError::SequenceConflict {
                expected: format!("> {last}"),
                received: seq.to_string(),
            });
        }
    }
    Ok(())
}

/// Merge an append body into the stored buffer: JSON streams go through the
/// stitching convention, raw streams concatenate.
pub fn merge_data(
    content_type: &str,
    buffer: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, StoreError> {
    let appended = if is_json_content_type(content_type) {
        json::stitch_items(&json::parse_items(data, false)?)
    } else {
        data.to_vec()
    };
    let mut merged = Vec::with_capacity(buffer.len() + appended.len());
    merged.extend_from_slice(buffer);
    merged.extend(appended);
    Ok(merged)
}

/// Validate and apply an append, producing the merged buffer and the updated
/// metadata. The caller commits both and then notifies waiters.
pub fn apply_append(
    meta: &StreamMeta,
    buffer: &[u8],
    data: &[u8],
    options: &AppendOptions,
) -> Result<(Vec<u8>, StreamMeta), StoreError> {
    validate_append_content_type(&meta.content_type, options.content_type.as_deref())?;
    validate_append_seq(meta.last_seq.as_deref(), options.seq.as_deref())?;
    let merged = merge_data(&meta.content_type, buffer, data)?;
    let added = (merged.len() - buffer.len()) as u64;
    let mut updated = meta.clone();
    updated.append_count += 1;
    updated.next_offset = meta.next().increment_seq().advance(added).to_string();
    if let Some(seq) = &options.seq {
        updated.last_seq = Some(seq.clone());
    }
    Ok((merged, updated))
}

/// Build the snapshot read result for a stream state.
///
/// At most one message is synthesized, covering `buffer[offset.pos..]`; its
/// offset is the request offset. Snapshot reads are always up to date.
pub fn snapshot_read(
    path: &str,
    meta: &StreamMeta,
    buffer: &[u8],
    offset: Offset,
    cursor: &CursorOptions,
) -> ReadResult {
    let mut messages = Vec::new();
    if (offset.pos as usize) < buffer.len() {
        messages.push(StreamMessage {
            data: buffer[offset.pos as usize..].to_vec(),
            offset: offset.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        });
    }
    ReadResult {
        messages,
        next_offset: meta.next_offset.clone(),
        up_to_date: true,
        cursor: calculate_cursor(cursor).to_string(),
        etag: format_etag(path, &offset.to_string(), &meta.next_offset),
        content_type: meta.content_type.clone(),
    }
}

/// The single message handed to a waiter that found data already present.
pub fn immediate_wait_message(buffer: &[u8], offset: Offset) -> StreamMessage {
    StreamMessage {
        data: buffer[offset.pos as usize..].to_vec(),
        offset: offset.to_string(),
        timestamp: Utc::now().timestamp_millis(),
    }
}

/// Format a response body from messages, given the stream's content type if
/// known. Unknown streams format to zero bytes.
pub fn format_messages(content_type: Option<&str>, messages: &[StreamMessage]) -> Vec<u8> {
    let Some(content_type) = content_type else {
        return Vec::new();
    };
    let concatenated: Vec<u8> = messages.iter().flat_map(|m| m.data.clone()).collect();
    if is_json_content_type(content_type) {
        json::wrap_response(concatenated)
    } else {
        concatenated
    }
}
