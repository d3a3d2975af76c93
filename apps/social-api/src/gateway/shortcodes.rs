use std::borrow::Cow;

/// Shortcodes replaced with their emoji in message bodies before persistence.
const SHORTCODES: [(&str, &str); 5] = [
    (":smile:", "😄"),
    (":heart:", "❤️"),
    (":thumbs_up:", "👍"),
    (":laugh:", "😂"),
    (":cry:", "😢"),
];

pub fn expand(content: &str) -> Cow<'_, str> {
    if !content.contains(':') {
        return Cow::Borrowed(content);
    }
    let mut out = Cow::Borrowed(content);
    for (code, emoji) in SHORTCODES {
        if out.contains(code) {
            out = Cow::Owned(out.replace(code, emoji));
        }
    }
    out
}

/// First `max_chars` characters of `content`, counted as Unicode scalar values.
pub fn preview(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}
