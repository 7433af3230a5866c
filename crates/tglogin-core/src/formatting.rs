//! Small HTML helpers for Telegram's HTML parse mode.

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Truncate to `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    format!("{}...", s.chars().take(max_chars).collect::<String>())
}

/// Escaped, length-bounded description safe to show to a user.
pub fn short_description(s: &str) -> String {
    escape_html(&truncate_with_ellipsis(s.trim(), 120))
}
