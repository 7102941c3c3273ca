//! Text normalization and tokenization helpers for indexing and keyword scoring.

/// Default upper bound on normalized document length, in characters.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 8_000;

/// Minimum query-term length (in chars) considered by keyword scoring is this plus one.
const MIN_TERM_CHARS: usize = 2;

/// Punctuation kept during normalization; everything else non-alphanumeric becomes a space.
const KEPT_PUNCTUATION: &[char] = &[
    '.', ',', ';', ':', '!', '?', '\'', '"', '(', ')', '-', '%', '&', '/',
];

/// Normalize document text before embedding and storage.
///
/// Replaces punctuation noise with spaces, collapses all whitespace runs
/// (including newlines) to a single space, trims, and truncates to
/// `max_chars` characters.
///
/// ```rust
/// use coursewright_core::text::normalize_content;
///
/// let n = normalize_content("  Hello ***world***\n\n  again  ", 100);
/// assert_eq!(n, "Hello world again");
/// ```
pub fn normalize_content(text: &str, max_chars: usize) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || KEPT_PUNCTUATION.contains(&c) {
                c
            } else {
                ' '
            }
        })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars).trim_end().to_string()
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Bounded excerpt for prompts, with an ellipsis when truncated.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let cut = truncate_chars(text, max_chars);
    if cut.len() < text.len() {
        format!("{}...", cut.trim_end())
    } else {
        cut.to_string()
    }
}

/// Lowercased query words longer than two characters, deduplicated in order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > MIN_TERM_CHARS)
    {
        if !terms.iter().any(|t| t == raw) {
            terms.push(raw.to_string());
        }
    }
    terms
}

/// Count occurrences of `word` in `haystack` bounded by non-word characters.
///
/// Both arguments are expected to be lowercased already.
pub fn count_whole_word(haystack: &str, word: &str) -> usize {
    if word.is_empty() {
        return 0;
    }
    haystack
        .match_indices(word)
        .filter(|(start, _)| {
            let before = haystack[..*start].chars().next_back();
            let after = haystack[start + word.len()..].chars().next();
            !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
        })
        .count()
}

/// Count non-overlapping substring occurrences of `word` in `haystack`.
pub fn count_substring(haystack: &str, word: &str) -> usize {
    if word.is_empty() {
        return 0;
    }
    haystack.matches(word).count()
}

/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
