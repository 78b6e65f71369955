/// Character budget for one speech synthesis request.
pub const SYNTHESIS_MAX_CHARS: usize = 5000;
/// Character budget for one translation request.
pub const TRANSLATION_MAX_CHARS: usize = 4500;

const SENTENCE_BOUNDARIES: [char; 4] = ['.', '!', '?', '\n'];

/// Splits `text` into trimmed chunks of at most `max_chars` characters.
///
/// Split points, in priority order: the rightmost sentence terminator or
/// newline inside the window, else the rightmost space, else a hard cut at
/// the window edge. The boundary character stays with the preceding chunk.
/// Lengths are counted in `char`s, never bytes.
pub fn split_text_smart(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        // Byte offset of the first char past the budget window.
        let window_end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let window = &rest[..window_end];

        let split_at = window
            .rfind(SENTENCE_BOUNDARIES)
            .or_else(|| window.rfind(' '))
            .map(|idx| idx + 1)
            .unwrap_or(window_end);

        let chunk = rest[..split_at].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = rest[split_at..].trim();
    }

    let last = rest.trim();
    if !last.is_empty() {
        chunks.push(last.to_string());
    }
    chunks
}
