//! Telegram MarkdownV2 helpers.

/// Characters MarkdownV2 treats as markup.
const RESERVED: [char; 18] = [
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Escapes `text` so that it renders literally in MarkdownV2.
///
/// ```
/// use ledger_bot::utils::markdown::escape_markdown;
///
/// assert_eq!(escape_markdown("12.5 Ӫ (fee)"), "12\\.5 Ӫ \\(fee\\)");
/// ```
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if RESERVED.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escaped `text` rendered in bold.
pub fn bold(text: &str) -> String {
    format!("*{}*", escape_markdown(text))
}
