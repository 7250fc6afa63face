//! Boundary-aware text chunking.
//!
//! Text is first normalized (line endings unified, every line trimmed,
//! blank lines dropped). Short text becomes a single chunk. Longer text is
//! covered by a window of `max_size` characters; each window's right edge
//! is pulled back to the nearest sentence end, line break or space found in
//! the window's last quarter, and the next window starts `overlap`
//! characters before that edge. When the last quarter holds no break the
//! window is cut hard at `max_size`.
//!
//! Sizes are counted in `char`s, never bytes, so multi-byte text is never
//! split inside a code point.

use crate::config::RagConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Chunk size must be positive")]
    ZeroSize,

    #[error("Chunk overlap ({overlap}) must be smaller than chunk size ({max_size})")]
    OverlapTooLarge { max_size: usize, overlap: usize },
}

pub type Result<T> = std::result::Result<T, ChunkError>;

/// Splits text into overlapping segments sized for embedding.
///
/// Parameters are checked once on construction; [`chunk`](Self::chunk)
/// itself cannot fail and is a pure function of its input.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(max_size: usize, overlap: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(ChunkError::ZeroSize);
        }
        if overlap >= max_size {
            return Err(ChunkError::OverlapTooLarge { max_size, overlap });
        }
        Ok(Self { max_size, overlap })
    }

    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() <= self.max_size {
            return vec![normalized];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.max_size).min(chars.len());
            if end == chars.len() {
                push_trimmed(&mut chunks, &chars[start..end]);
                break;
            }

            let cut = start + boundary(&chars, start, end);
            push_trimmed(&mut chunks, &chars[start..cut]);

            start = cut.saturating_sub(self.overlap).max(start + 1);
        }

        chunks
    }
}

/// Unifies line endings, trims every line and drops blank ones.
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_trimmed(chunks: &mut Vec<String>, window: &[char]) {
    let chunk: String = window.iter().collect();
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_string());
    }
}

/// Length of the window `chars[start..end]` after pulling its right edge
/// back to a natural break in the last quarter.
fn boundary(chars: &[char], start: usize, end: usize) -> usize {
    let window = &chars[start..end];
    let width = window.len();
    let floor = width * 3 / 4;

    // Sentence end: terminator followed by whitespace. The character after
    // the window is visible because this is never the final window.
    for i in (floor..width).rev() {
        if matches!(window[i], '.' | '!' | '?')
            && matches!(chars.get(start + i + 1), Some(' ' | '\n'))
        {
            return i + 1;
        }
    }

    for i in (floor..width).rev() {
        if window[i] == '\n' {
            return i;
        }
    }

    for i in (floor..width).rev() {
        if window[i] == ' ' {
            return i;
        }
    }

    width
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(len: usize) -> String {
        const WORDS: [&str; 6] = ["blood", "pressure", "was", "stable", "during", "visit"];
        let mut text = String::new();
        let mut i = 0;
        while text.len() < len {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(WORDS[i % WORDS.len()]);
            i += 1;
        }
        text.truncate(len);
        text.trim_end().to_string()
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        assert!(matches!(
            Chunker::new(100, 100),
            Err(ChunkError::OverlapTooLarge { max_size: 100, overlap: 100 })
        ));
        assert!(matches!(Chunker::new(0, 0), Err(ChunkError::ZeroSize)));
        assert!(Chunker::new(100, 99).is_ok());
    }

    #[test]
    fn test_short_text_is_single_normalized_chunk() {
        let chunker = Chunker::new(100, 10).unwrap();
        let chunks = chunker.chunk("  Line one  \r\n\r\n\tLine two\rLine three ");
        assert_eq!(chunks, vec!["Line one\nLine two\nLine three"]);
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        let chunker = Chunker::new(100, 10).unwrap();
        assert!(chunker.chunk(" \n\r\n\t ").is_empty());
    }

    #[test]
    fn test_chunks_respect_max_size() {
        let chunker = Chunker::new(120, 20).unwrap();
        let text = words(2_000);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 120, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn test_prefers_sentence_end() {
        // sentence ends at char 88 of a 100-char window (inside the last quarter)
        let first = format!("{}.", "a".repeat(87));
        let text = format!("{} {}", first, "b ".repeat(60));
        let chunker = Chunker::new(100, 10).unwrap();
        let chunks = chunker.chunk(&text);
        assert_eq!(chunks[0], first);
    }

    #[test]
    fn test_prefers_line_break_over_space() {
        let text = format!("{} {}\n{}", "a".repeat(80), "b".repeat(10), "c".repeat(50));
        let chunker = Chunker::new(100, 10).unwrap();
        let chunks = chunker.chunk(&text);
        assert_eq!(chunks[0], format!("{} {}", "a".repeat(80), "b".repeat(10)));
    }

    #[test]
    fn test_ignores_breaks_before_last_quarter() {
        // the only space sits at index 10, far outside the last quarter
        let text = format!("{} {}", "a".repeat(10), "b".repeat(200));
        let chunker = Chunker::new(100, 10).unwrap();
        let chunks = chunker.chunk(&text);
        assert_eq!(chunks[0].chars().count(), 100);
    }

    #[test]
    fn test_hard_cut_without_breaks() {
        let text = "x".repeat(250);
        let chunker = Chunker::new(100, 20).unwrap();
        let chunks = chunker.chunk(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[1].len(), 100);
        assert_eq!(chunks[2].len(), 90);
    }

    #[test]
    fn test_multibyte_text_is_split_on_char_boundaries() {
        let text = "健康".repeat(150);
        let chunker = Chunker::new(100, 10).unwrap();
        let chunks = chunker.chunk(&text);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let chunker = Chunker::new(200, 40).unwrap();
        let text = words(1_500);
        let chunks = chunker.chunk(&text);
        for pair in chunks.windows(2) {
            let head: String = pair[1].chars().take(30).collect();
            assert!(pair[0].contains(&head), "{:?} not in {:?}", head, pair[0]);
        }
    }

    #[test]
    fn test_rechunking_a_chunk_is_identity() {
        let chunker = Chunker::new(150, 30).unwrap();
        let text = format!("{}\n{}", words(400), words(300));
        for chunk in chunker.chunk(&text) {
            assert_eq!(chunker.chunk(&chunk), vec![chunk.clone()]);
        }
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let chunker = Chunker::new(150, 30).unwrap();
        let text = words(1_000);
        assert_eq!(chunker.chunk(&text), chunker.chunk(&text));
    }
}
