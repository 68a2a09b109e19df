//! In-process stream-existence cache.
//!
//! Every substrate keeps a `path -> content_type` map fed by successful
//! operations. For substrates whose source of truth is remote it backs the
//! `has()` hint and lets `format_response()` pick the right framing without a
//! round trip; it is authoritative only after this instance has observed the
//! stream at least once.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Default)]
pub(crate) struct ExistenceCache {
    inner: RwLock<HashMap<String, String>>,
}

impl ExistenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` exists with the given content type.
    pub fn record(&self, path: &str, content_type: &str) {
        self.inner
            .write()
            .insert(path.to_string(), content_type.to_string());
    }

    /// Drop a path after delete or observed expiry.
    pub fn forget(&self, path: &str) {
        self.inner.write().remove(path);
    }

    /// The cached content type, if this instance has seen the stream.
    pub fn content_type(&self, path: &str) -> Option<String> {
        self.inner.read().get(path).cloned()
    }

    /// Existence hint.
    pub fn contains(&self, path: &str) -> bool {
        self.inner.read().contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_forget() {
        let cache = ExistenceCache::new();
        assert!(!cache.contains("/s"));
        cache.record("/s", "application/json");
        assert!(cache.contains("/s"));
        assert_eq!(cache.content_type("/s").as_deref(), Some("application/json"));
        cache.forget("/s");
        assert!(!cache.contains("/s"));
        assert_eq!(cache.content_type("/s"), None);
    }
}
