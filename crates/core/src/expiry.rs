//! TTL and absolute-expiry parsing.
//!
//! `Stream-TTL` is a positive decimal second count with no leading zeros.
//! `Stream-Expires-At` is strict ISO 8601: date, time with mandatory seconds,
//! optional fraction, and a mandatory `Z` or `±HH:MM` offset. Both go through
//! a shape check before the date parse so lenient parser behavior cannot
//! widen the accepted grammar.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

static TTL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[1-9][0-9]*$").unwrap());

static EXPIRES_AT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})$").unwrap()
});

/// Parse a TTL header value. Accepts only `[1-9][0-9]*`.
pub fn parse_ttl(value: &str) -> Option<u64> {
    if !TTL_RE.is_match(value) {
        return None;
    }
    value.parse().ok()
}

/// Parse an absolute expiry timestamp. Accepts only strict ISO 8601 with
/// seconds and an explicit timezone.
pub fn parse_expires_at(value: &str) -> Option<DateTime<Utc>> {
    if !EXPIRES_AT_RE.is_match(value) {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
