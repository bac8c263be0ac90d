//! Mapping from storage keys to vector namespaces.

use sha2::{Digest, Sha256};

/// Prefix applied by [`namespace_for`].
pub const DEFAULT_NAMESPACE_PREFIX: &str = "docchat-";

const HASH_SUFFIX_LEN: usize = 12;

/// Longest collection name Qdrant accepts.
const MAX_NAMESPACE_LEN: usize = 255;

/// Namespace for a document key using [`DEFAULT_NAMESPACE_PREFIX`].
pub fn namespace_for(key: &str) -> String {
    namespace_with_prefix(DEFAULT_NAMESPACE_PREFIX, key)
}

/// Namespace for a document key under `prefix`.
///
/// The result is ASCII and limited to `[A-Za-z0-9._-]` beyond the prefix. Other ASCII characters
/// become `_` and non-ASCII characters are dropped; when either happens, a `-` and the first 12 hex
/// digits of SHA-256(key) are appended so distinct keys stay distinct. Names longer than
/// 255 bytes, Qdrant's collection name limit, keep the head of the body and always carry the suffix.
pub fn namespace_with_prefix(prefix: &str, key: &str) -> String {
    let mut altered = false;
    let mut body = String::with_capacity(key.len());
    for ch in key.chars() {
        match ch {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '_' | '-' => body.push(ch),
            ch if ch.is_ascii() => {
                body.push('_');
                altered = true;
            }
            _ => altered = true,
        }
    }

    let suffix_len = if altered { HASH_SUFFIX_LEN + 1 } else { 0 };
    if prefix.len() + body.len() + suffix_len > MAX_NAMESPACE_LEN {
        let room = MAX_NAMESPACE_LEN.saturating_sub(prefix.len() + 1 + HASH_SUFFIX_LEN);
        // The body is ASCII, so any byte offset is a char boundary.
        body.truncate(room);
        altered = true;
    }

    if altered {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        body.push('-');
        body.push_str(&digest[..HASH_SUFFIX_LEN]);
    }

    format!("{prefix}{body}")
}
