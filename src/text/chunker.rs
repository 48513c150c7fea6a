//! Splitting normalized text into synthesis-sized chunks
//!
//! Each chunk is cut from a fixed-size window. The break point is searched
//! only in the tail of the window, preferring a paragraph break, then a line
//! break, then a space, and finally cutting hard at the window edge. This
//! keeps every non-final chunk between `max - search` and `max` characters.
//!
//! All lengths and offsets count chars, not bytes.

use serde::{Deserialize, Serialize};

use super::normalize;

/// Maximum characters in a single chunk
pub const MAX_CHUNK_LEN: usize = 1000;

/// How far back from the window edge to look for a break point
pub const BREAK_SEARCH_LEN: usize = 200;

/// A bounded slice of normalized text, synthesized as one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChunk {
    /// Trimmed chunk text
    pub text: String,
    /// Char offset into the normalized source where this chunk's slice began
    pub start_offset: usize,
}

impl TextChunk {
    /// Length of the chunk text in chars
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Window sizing for the chunker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Window size, and the upper bound on chunk length
    pub max_chunk_len: usize,
    /// Trailing part of the window searched for a break point
    pub break_search: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_len: MAX_CHUNK_LEN,
            break_search: BREAK_SEARCH_LEN,
        }
    }
}

/// Splits documents into [`TextChunk`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a chunker with explicit window sizing
    #[must_use]
    pub const fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Normalize `text` and split it, starting at char offset `start` of the
    /// normalized text
    #[must_use]
    pub fn split(&self, text: &str, start: usize) -> Vec<TextChunk> {
        self.split_normalized(&normalize(text), start)
    }

    /// Split text that has already been normalized
    ///
    /// A `start` at or past the end yields no chunks.
    #[must_use]
    pub fn split_normalized(&self, normalized: &str, start: usize) -> Vec<TextChunk> {
        let chars: Vec<char> = normalized.chars().collect();
        let max = self.config.max_chunk_len.max(1);
        let search = self.config.break_search.min(max);

        let mut chunks = Vec::new();
        let mut cursor = start.min(chars.len());

        while cursor < chars.len() {
            if chars.len() - cursor <= max {
                push_trimmed(&mut chunks, &chars[cursor..], cursor);
                break;
            }

            let window_end = cursor + max;
            let end = find_break(&chars[cursor..window_end], search)
                .map_or(window_end, |at| cursor + at);

            push_trimmed(&mut chunks, &chars[cursor..end], cursor);

            // Always make progress, even on a degenerate break
            cursor = end.max(cursor + 1);
        }

        tracing::trace!(
            chars = chars.len(),
            start,
            chunks = chunks.len(),
            "split text into chunks"
        );

        chunks
    }
}

/// Split `text` with the default window sizing
#[must_use]
pub fn split(text: &str, start: usize) -> Vec<TextChunk> {
    Chunker::default().split(text, start)
}

/// Find the exclusive end of the chunk within `window`
///
/// Only the last `search` chars are considered. The separator stays with
/// the chunk being closed and is trimmed away later.
fn find_break(window: &[char], search: usize) -> Option<usize> {
    let from = window.len() - search;
    let tail = &window[from..];

    if let Some(pos) = tail.windows(2).rposition(|w| w[0] == '\n' && w[1] == '\n') {
        return Some(from + pos + 2);
    }
    if let Some(pos) = tail.iter().rposition(|&c| c == '\n') {
        return Some(from + pos + 1);
    }
    if let Some(pos) = tail.iter().rposition(|&c| c == ' ') {
        return Some(from + pos + 1);
    }

    None
}

fn push_trimmed(chunks: &mut Vec<TextChunk>, slice: &[char], start_offset: usize) {
    let text: String = slice.iter().collect();
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(TextChunk {
            text: trimmed.to_string(),
            start_offset,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(max: usize, search: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            max_chunk_len: max,
            break_search: search,
        })
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(split("", 0).is_empty());
    }

    #[test]
    fn start_at_end_yields_no_chunks() {
        let text = "Hello there, reader.";
        assert!(split(text, text.chars().count()).is_empty());
        assert!(split(text, 10_000).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split("  A short page.  ", 0);
        assert_eq!(
            chunks,
            vec![TextChunk {
                text: "A short page.".to_string(),
                start_offset: 0,
            }]
        );
    }

    #[test]
    fn hard_cut_without_any_break() {
        let text = "a".repeat(2400);
        let chunks = split(&text, 0);
        let lens: Vec<usize> = chunks.iter().map(TextChunk::char_len).collect();
        assert_eq!(lens, vec![1000, 1000, 400]);
        let offsets: Vec<usize> = chunks.iter().map(|c| c.start_offset).collect();
        assert_eq!(offsets, vec![0, 1000, 2000]);
    }

    #[test]
    fn prefers_paragraph_over_later_space() {
        // window "aaaa\n\nbb cc" (11 chars), search the last 8
        let chunks = small(11, 8).split_normalized("aaaa\n\nbb cc dd", 0);
        assert_eq!(chunks[0].text, "aaaa");
        assert_eq!(chunks[1].text, "bb cc dd");
        assert_eq!(chunks[1].start_offset, 6);
    }

    #[test]
    fn prefers_line_break_over_space() {
        let chunks = small(10, 6).split_normalized("aaaaa\nb cdefghij", 0);
        assert_eq!(chunks[0].text, "aaaaa");
        assert_eq!(chunks[1].start_offset, 6);
    }

    #[test]
    fn breaks_at_last_space_in_search_zone() {
        let chunks = small(10, 5).split_normalized("aaaaaa bb cccc", 0);
        assert_eq!(chunks[0].text, "aaaaaa bb");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[1].text, "cccc");
        assert_eq!(chunks[1].start_offset, 10);
    }

    #[test]
    fn ignores_breaks_before_search_zone() {
        // The only space sits outside the last 3 chars of the window
        let chunks = small(8, 3).split_normalized("ab cdefghijkl", 0);
        assert_eq!(chunks[0].text, "ab cdefg");
        assert_eq!(chunks[1].start_offset, 8);
    }

    #[test]
    fn whitespace_only_slices_are_dropped() {
        let text = format!("{}\n\n{}", "a".repeat(5), " ".repeat(20));
        let chunks = small(8, 4).split_normalized(&text, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "aaaaa");
    }

    #[test]
    fn resume_offset_is_absolute() {
        let text = "a".repeat(2400);
        let chunks = split(&text, 1500);
        let offsets: Vec<usize> = chunks.iter().map(|c| c.start_offset).collect();
        assert_eq!(offsets, vec![1500]);
        assert_eq!(chunks[0].char_len(), 900);
    }

    #[test]
    fn counts_chars_not_bytes() {
        let text = "é".repeat(15);
        let chunks = small(10, 2).split_normalized(&text, 0);
        assert_eq!(chunks[0].char_len(), 10);
        assert_eq!(chunks[1].start_offset, 10);
        assert_eq!(chunks[1].char_len(), 5);
    }

    #[test]
    fn degenerate_config_still_terminates() {
        let chunks = small(0, 0).split_normalized("abc", 0);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, "abc");
    }

    #[test]
    fn split_normalizes_markdown_first() {
        let chunks = split("# Title\n\nBody text", 0);
        assert_eq!(chunks[0].text, "Title\n\nBody text");
    }
}
