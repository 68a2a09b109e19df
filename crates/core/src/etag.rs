//! ETag codec for conditional reads.
//!
//! The ETag of a snapshot is the quoted triple
//! `"base64url(path):startOffset:endOffset"`. Embedding the path makes
//! collisions across streams impossible; embedding both offsets makes the tag
//! identify one exact byte range.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

/// Format the quoted ETag for a `(path, start, end)` snapshot.
pub fn format_etag(path: &str, start_offset: &str, end_offset: &str) -> String {
    format!(
        "\"{}:{}:{}\"",
        URL_SAFE_NO_PAD.encode(path),
        start_offset,
        end_offset
    )
}

/// Parse a quoted ETag back into `(path, start, end)`.
pub fn parse_etag(etag: &str) -> Option<(String, String, String)> {
    let inner = etag.strip_prefix('"')?.strip_suffix('"')?;
    let mut parts = inner.splitn(3, ':');
    let path_b64 = parts.next()?;
    let start = parts.next()?;
    let end = parts.next()?;
    let path = String::from_utf8(URL_SAFE_NO_PAD.decode(path_b64).ok()?).ok()?;
    Some((path, start.to_string(), end.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::format_offset;

    #[test]
    fn formats_quoted_triple() {
        let etag = format_etag("/s", &format_offset(0, 0), &format_offset(1, 5));
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag.matches(':').count(), 2);
    }

    #[test]
    fn roundtrip() {
        let start = format_offset(0, 0);
        let end = format_offset(2, 11);
        let etag = format_etag("/stream/events", &start, &end);
        let (path, s, e) = parse_etag(&etag).unwrap();
        assert_eq!(path, "/stream/events");
        assert_eq!(s, start);
        assert_eq!(e, end);
    }

    #[test]
    fn sentinel_start_offset_is_representable() {
        let etag = format_etag("/s", "-1", &format_offset(0, 0));
        let (_, s, _) = parse_etag(&etag).unwrap();
        assert_eq!(s, "-1");
    }

    #[test]
    fn distinct_paths_never_collide() {
        let end = format_offset(1, 1);
        assert_ne!(
            format_etag("/a", "-1", &end),
            format_etag("/b", "-1", &end)
        );
    }

    #[test]
    fn rejects_unquoted_and_malformed() {
        assert!(parse_etag("abc:def:ghi").is_none());
        assert!(parse_etag("\"only:two\"").is_none());
        assert!(parse_etag("\"!!!:a:b\"").is_none());
    }
}
