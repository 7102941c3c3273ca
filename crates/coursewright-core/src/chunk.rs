//! Fixed-size word-window chunker for course materials.
//!
//! Splits a source file's text into non-overlapping windows of at most
//! `window_words` whitespace-separated words. Each [`Chunk`] gets a
//! deterministic id `<source>#<index>` so re-ingesting the same file
//! replaces its chunks in the index, plus a SHA-256 hash of its text.
//!
//! # Example
//!
//! ```rust
//! use coursewright_core::chunk::chunk_words;
//!
//! let chunks = chunk_words("notes/intro.md", "one two three four five", 2);
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[2].id, "notes/intro.md#2");
//! assert_eq!(chunks[2].text, "five");
//! ```

use sha2::{Digest, Sha256};

/// Default window size used by material ingestion.
pub const DEFAULT_CHUNK_WORDS: usize = 1_000;

/// One window of a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// `<source>#<index>`.
    pub id: String,
    pub source: String,
    /// Zero-based, contiguous position within the source.
    pub index: usize,
    pub text: String,
    /// Hex SHA-256 of `text`.
    pub hash: String,
}

/// Split text into non-overlapping windows of `window_words` words.
///
/// Whitespace inside a window is collapsed to single spaces. Blank input
/// produces no chunks. A `window_words` of zero is treated as one.
pub fn chunk_words(source: &str, text: &str, window_words: usize) -> Vec<Chunk> {
    let window = window_words.max(1);
    let words: Vec<&str> = text.split_whitespace().collect();

    words
        .chunks(window)
        .enumerate()
        .map(|(index, slice)| make_chunk(source, index, &slice.join(" ")))
        .collect()
}

/// Deterministic chunk id for a source position.
pub fn chunk_id(source: &str, index: usize) -> String {
    format!("{source}#{index}")
}

fn make_chunk(source: &str, index: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(source, index),
        source: source.to_string(),
        index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_words("a.md", "Hello, world!", 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].id, "a.md#0");
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_words("a.md", "", 1000).is_empty());
        assert!(chunk_words("a.md", " \n\t ", 1000).is_empty());
    }

    #[test]
    fn test_windows_do_not_overlap() {
        let text = (0..2500).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk_words("big.txt", &text, 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.split(' ').count(), 1000);
        assert_eq!(chunks[2].text.split(' ').count(), 500);
        assert!(chunks[1].text.starts_with("w1000 "));
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = "word ".repeat(95);
        let chunks = chunk_words("a.md", &text, 10);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_zero_window_is_one_word() {
        let chunks = chunk_words("a.md", "a b", 0);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_words("a.md", text, 3);
        let c2 = chunk_words("a.md", text, 3);
        assert_eq!(c1, c2);
        assert_ne!(c1[0].hash, c1[1].hash);
    }
}
