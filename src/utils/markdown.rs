//! Telegram MarkdownV2 helpers.

const SPECIAL: &[char] = &[
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Escapes every character with special meaning in MarkdownV2 so the text
/// renders literally.
///
/// ```
/// use fajr_reminder_bot::utils::markdown::escape_markdown;
///
/// assert_eq!(escape_markdown("Saved (Cairo)!"), "Saved \\(Cairo\\)\\!");
/// ```
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_unchanged() {
        assert_eq!(escape_markdown("Cairo Egypt"), "Cairo Egypt");
        assert_eq!(escape_markdown(""), "");
    }

    #[test]
    fn test_place_names_with_punctuation() {
        assert_eq!(escape_markdown("St. John's"), "St\\. John's");
        assert_eq!(escape_markdown("Ras al-Khaimah"), "Ras al\\-Khaimah");
    }

    #[test]
    fn test_backslash_is_escaped_first() {
        assert_eq!(escape_markdown("a\\b_c"), "a\\\\b\\_c");
    }

    #[test]
    fn test_non_ascii_is_preserved() {
        assert_eq!(escape_markdown("القاهرة 🌙"), "القاهرة 🌙");
    }
}
