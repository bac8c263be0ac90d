use std::time::{SystemTime, UNIX_EPOCH};

const UPLOAD_PREFIX: &str = "uploads/";

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

/// Storage key for an upload named `original_name` at `millis`.
pub fn generate_key(original_name: &str, millis: u128) -> String {
    format!("{UPLOAD_PREFIX}{millis}{}", sanitize_file_name(original_name))
}

/// Make a user-supplied file name safe to embed in a key.
///
/// Whitespace becomes `-`; path separators become `_` so the key never gains extra segments.
/// An empty name becomes `document.pdf`.
pub fn sanitize_file_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "document.pdf".to_string();
    }
    trimmed
        .chars()
        .map(|ch| match ch {
            ch if ch.is_whitespace() => '-',
            '/' | '\\' => '_',
            other => other,
        })
        .collect()
}
