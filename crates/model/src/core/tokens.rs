/// Rough characters-per-token ratio used for budgeting. Conservative for
/// English prose; code and JSON tokenize denser.
pub const CHARS_PER_TOKEN: f64 = 3.5;

/// Fixed per-message cost for the role/index header added when formatting.
pub const MESSAGE_HEADER_CHARS: usize = 50;

pub fn estimate_tokens(text: &str) -> usize {
    tokens_for_chars(text.chars().count())
}

pub fn tokens_for_chars(chars: usize) -> usize {
    (chars as f64 / CHARS_PER_TOKEN).ceil() as usize
}

/// Largest character count whose estimate stays within `tokens`.
pub fn chars_for_tokens(tokens: usize) -> usize {
    (tokens as f64 * CHARS_PER_TOKEN).floor() as usize
}
