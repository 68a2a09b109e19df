//! Path encoding for substrate-safe keys.
//!
//! Stream paths are arbitrary UTF-8 (usually URL pathnames), so substrates
//! that key on them (KV, object store) use a base64url form. Encodings longer
//! than 200 characters are truncated to 180 and suffixed with `~` plus the
//! first 16 hex digits of the SHA-256 of the original path, which keeps keys
//! bounded while staying unique for all practical purposes.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// Maximum length for an encoded path before truncation.
const MAX_ENCODED_LENGTH: usize = 200;
/// Length the base64 portion is truncated to.
const TRUNCATE_LENGTH: usize = 180;
/// Hex digits of SHA-256 kept in the suffix.
const HASH_SUFFIX_LENGTH: usize = 16;

/// Encode a stream path into a substrate-safe key.
pub fn encode_path(path: &str) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(path.as_bytes());
    if encoded.len() > MAX_ENCODED_LENGTH {
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        let hash = hex::encode(hasher.finalize());
        format!(
            "{}~{}",
            &encoded[..TRUNCATE_LENGTH],
            &hash[..HASH_SUFFIX_LENGTH]
        )
    } else {
        encoded
    }
}

/// Decode an encoded key back into a path.
///
/// A trailing `~` followed by exactly 16 hex digits marks a truncated
/// encoding; the suffix is stripped and the remaining base64 prefix decoded,
/// so the round trip is lossy only for paths that were truncated.
pub fn decode_path(encoded: &str) -> Option<String> {
    if let Some(idx) = encoded.len().checked_sub(HASH_SUFFIX_LENGTH + 1) {
        let (prefix, suffix) = encoded.split_at(idx);
        if suffix.starts_with('~') && is_hash_suffix(&suffix[1..]) {
            let bytes = URL_SAFE_NO_PAD.decode(prefix).ok()?;
            // The truncation may have split a UTF-8 sequence.
            return Some(String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

fn is_hash_suffix(s: &str) -> bool {
    s.len() == HASH_SUFFIX_LENGTH
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
