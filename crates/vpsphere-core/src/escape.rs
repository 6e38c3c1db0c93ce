//! Markup escaping for outbound chat text.
//!
//! Chunks are rendered in Telegram MarkdownV2, where a fixed set of
//! punctuation must be backslash-escaped wherever it appears in dynamic
//! text. Alerts and upload receipts use HTML instead.

/// Characters MarkdownV2 reserves. The backslash is one of them, inside
/// code blocks as well.
pub const MARKDOWN_RESERVED: &[char] = &[
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.',
    '!',
];

/// Backslash-escape every reserved MarkdownV2 character in `text`.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        if MARKDOWN_RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inverse of [`escape_markdown`]: drop a backslash that precedes a reserved
/// character. Backslashes before anything else are kept.
pub fn unescape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if MARKDOWN_RESERVED.contains(&next) {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Render `text` as an escaped MarkdownV2 preformatted block.
pub fn code_block(text: &str) -> String {
    format!("```\n{}\n```", escape_markdown(text))
}

/// Render `text` as escaped inline code.
pub fn inline_code(text: &str) -> String {
    format!("`{}`", escape_markdown(text))
}

/// Recover the raw text from a block produced by [`code_block`].
pub fn strip_code_block(rendered: &str) -> Option<String> {
    let inner = rendered.strip_prefix("```\n")?.strip_suffix("\n```")?;
    Some(unescape_markdown(inner))
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            other => out.push(other),
        }
    }
    out
}
