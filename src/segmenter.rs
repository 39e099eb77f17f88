//! Text segmenter
//!
//! Splits narrative report text into overlapping chunks for semantic indexing.
//! Chunks prefer to end at a paragraph or sentence boundary inside the window.

use crate::config::SegmenterConfig;

#[derive(Debug, Clone)]
pub struct TextSegmenter {
    chunk_size: usize,
    overlap: usize,
}

impl TextSegmenter {
    pub fn new(config: &SegmenterConfig) -> Self {
        // guard against a config that would never advance
        let chunk_size = config.chunk_size.max(1);
        let overlap = config.overlap.min(chunk_size - 1);
        Self { chunk_size, overlap }
    }

    /// Split `text` into chunks of at most `chunk_size` characters.
    pub fn segment(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let hard_end = (start + self.chunk_size).min(chars.len());
            let end = if hard_end < chars.len() {
                soft_break(&chars[start..hard_end])
                    .map(|offset| start + offset)
                    .filter(|end| end - start > self.overlap)
                    .unwrap_or(hard_end)
            } else {
                hard_end
            };

            let chunk: String = chars[start..end].iter().collect();
            let trimmed = chunk.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end >= chars.len() {
                break;
            }
            start = end - self.overlap;
        }

        chunks
    }
}

impl Default for TextSegmenter {
    fn default() -> Self {
        Self::new(&SegmenterConfig::default())
    }
}

/// Last paragraph break, else last sentence end, in the second half of the window.
fn soft_break(window: &[char]) -> Option<usize> {
    let half = window.len() / 2;

    let paragraph = window
        .windows(2)
        .rposition(|w| w[0] == '\n' && w[1] == '\n')
        .map(|i| i + 2);
    if let Some(p) = paragraph.filter(|p| *p > half) {
        return Some(p);
    }

    window
        .windows(2)
        .rposition(|w| matches!(w[0], '.' | '?' | '!') && w[1].is_whitespace())
        .map(|i| i + 1)
        .filter(|p| *p > half)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter(chunk_size: usize, overlap: usize) -> TextSegmenter {
        TextSegmenter::new(&SegmenterConfig { chunk_size, overlap })
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = TextSegmenter::default().segment("DPI is distributions over paid-in capital.");
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(TextSegmenter::default().segment("   ").is_empty());
    }

    #[test]
    fn test_chunks_overlap_and_respect_size() {
        let text = "abcdefghij".repeat(10);
        let chunks = segmenter(30, 5).segment(&text);

        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
        // consecutive chunks share the overlap
        assert_eq!(&chunks[0][25..], &chunks[1][..5]);
        let last = chunks.last().unwrap();
        assert!(text.ends_with(last.as_str()));
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        let text = "The fund called capital twice. Distributions followed in the second year and continued.";
        let chunks = segmenter(50, 5).segment(text);
        assert_eq!(chunks[0], "The fund called capital twice.");
    }

    #[test]
    fn test_multibyte_text_is_safe() {
        let text = "€ distributions é ".repeat(40);
        let chunks = segmenter(25, 3).segment(&text);
        assert!(!chunks.is_empty());
    }
}
