//! Paragraph-boundary text chunker.
//!
//! Splits extracted page text into [`Chunk`]s no longer than a token
//! budget. Paragraphs (`\n\n`) are packed greedily; a paragraph that alone
//! exceeds the budget is hard-split at the last newline or space before
//! the limit.

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split `text` fetched from `url` into chunks of at most `max_tokens`.
///
/// Whitespace-only input yields no chunks.
pub fn chunk_text(url: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let joined_len = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if joined_len > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }
        if para.len() > max_chars {
            pieces.extend(hard_split(para, max_chars));
            continue;
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .map(|text| Chunk {
            url: url.to_string(),
            text,
        })
        .collect()
}

/// Split an oversized paragraph, preferring newline then space boundaries.
fn hard_split(mut rest: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    while !rest.is_empty() {
        if rest.len() <= max_chars {
            out.push(rest.trim().to_string());
            break;
        }
        let limit = floor_char_boundary(rest, max_chars);
        let cut = rest[..limit]
            .rfind('\n')
            .or_else(|| rest[..limit].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        // Always make progress, even for a single wide character.
        let cut = if cut == 0 {
            rest.chars().next().map(char::len_utf8).unwrap_or(rest.len())
        } else {
            cut
        };
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        rest = &rest[cut..];
    }
    out.retain(|p| !p.is_empty());
    out
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("https://a.com", "Hello, world!", 64);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].url, "https://a.com");
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_text("u", "  \n\n ", 64).is_empty());
    }

    #[test]
    fn test_paragraphs_packed_then_split() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        assert_eq!(chunk_text("u", text, 700).len(), 1);
        let small = chunk_text("u", text, 6);
        assert_eq!(small.len(), 3);
        assert_eq!(small[1].text, "This is paragraph two.");
    }

    #[test]
    fn test_oversized_paragraph_respects_limit() {
        let text = "word ".repeat(200);
        let chunks = chunk_text("u", &text, 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 40);
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_text("u", text, 1);
        assert!(!chunks.is_empty());
        let rejoined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert!(rejoined.contains("Hello"));
    }
}
