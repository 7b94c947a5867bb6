//! Persisted diagnostic text
//!
//! Result and error messages come from external processing units and are
//! stored on queue entries. Before storage they are stripped of characters
//! that break downstream persistence and capped at [`MAX_PERSISTED_CHARS`].

/// Maximum number of characters kept for result and error text.
pub const MAX_PERSISTED_CHARS: usize = 500;

/// Remove characters that downstream consumers cannot store or escape safely.
///
/// Drops single quotes, NUL and control characters; newlines and tabs survive.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\'' && (!c.is_control() || *c == '\n' || *c == '\t'))
        .collect()
}

/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Sanitize, trim, then truncate to [`MAX_PERSISTED_CHARS`].
pub fn for_persistence(text: &str) -> String {
    truncate(sanitize(text).trim(), MAX_PERSISTED_CHARS)
}

/// Like [`for_persistence`], substituting `fallback` when nothing printable remains.
pub fn for_persistence_or(text: &str, fallback: &str) -> String {
    let cleaned = for_persistence(text);
    if cleaned.is_empty() {
        for_persistence(fallback)
    } else {
        cleaned
    }
}
