//! Small helpers shared across the pipeline: log truncation, truncated-JSON
//! detection, and title normalization for deduplication.

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` bytes with an ellipsis and byte count
/// indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the model response is cut off (e.g., by a token limit), the recovered
/// JSON fails to parse with an EOF error. The pipeline re-asks once in that
/// case instead of falling back immediately.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Normalize a title for use in a dedupe key: lowercase, punctuation
/// stripped, whitespace collapsed. "Vote Count Begins!" and "vote count
/// begins" collide on purpose.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut prev_space = false;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            prev_space = false;
        } else if !prev_space && !out.is_empty() {
            out.push(' ');
            prev_space = true;
        }
    }
    out.trim_end().to_string()
}
