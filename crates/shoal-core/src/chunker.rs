//! Text segmentation into ordered, overlapping semantic chunks
//!
//! The chunker is a pure function: identical inputs always yield identical
//! chunks, so re-running ingestion rebuilds the same chunk (and therefore
//! vector) identifiers. Offsets are in characters, not bytes.

use crate::types::{chunk_id_for, estimate_tokens, SemanticChunk};

/// Split `content` into chunks of at most `chunk_size` characters
///
/// Adjacent chunks overlap by `chunk_overlap` characters (less only when a
/// chunk is shorter than the overlap itself). Chunk boundaries prefer, in
/// order: a paragraph break (blank line), a sentence terminator followed by
/// whitespace, any whitespace, and finally a hard cut at the window edge.
/// Whitespace-only windows are skipped without consuming a position.
///
/// `chunk_overlap` must be smaller than `chunk_size`; callers validate this
/// through the collection settings.
pub fn chunk_text(
    content: &str,
    document_id: &str,
    chunk_size: u32,
    chunk_overlap: u32,
) -> Vec<SemanticChunk> {
    let chunk_size = (chunk_size as usize).max(1);
    let overlap = (chunk_overlap as usize).min(chunk_size - 1);

    // Char-indexed view: `chars[i]` with its starting byte offset, so that
    // char offsets slice back into the original string.
    let indexed: Vec<(usize, char)> = content.char_indices().collect();
    let n = indexed.len();
    let byte_at = |char_idx: usize| -> usize {
        if char_idx >= n {
            content.len()
        } else {
            indexed[char_idx].0
        }
    };

    let mut chunks = Vec::new();
    let mut position = 0u32;
    let mut start = 0usize;

    while start < n {
        let window_end = (start + chunk_size).min(n);
        let end = if window_end == n {
            n
        } else {
            find_boundary(&indexed, start, window_end, chunk_size)
        };

        let text = &content[byte_at(start)..byte_at(end)];
        if !text.trim().is_empty() {
            chunks.push(SemanticChunk {
                id: chunk_id_for(document_id, position),
                document_id: document_id.to_string(),
                text: text.to_string(),
                position,
                char_start: start as u64,
                char_end: end as u64,
                token_count: Some(estimate_tokens(text)),
            });
            position += 1;
        }

        if end >= n {
            break;
        }
        // A boundary cut can land before `start + overlap`; clamp instead
        // of underflowing, and always advance by at least one char
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

/// Pick the cut position in `(start, window_end]`
///
/// A boundary in the first half of the window is not suitable: cutting
/// there would shrink chunks toward single characters whenever an early
/// boundary keeps landing inside successive windows.
fn find_boundary(
    indexed: &[(usize, char)],
    start: usize,
    window_end: usize,
    chunk_size: usize,
) -> usize {
    let min_end = start + (chunk_size / 2).max(1);

    // Paragraph break: end the chunk right after a blank line
    for p in (min_end.max(start + 2)..=window_end).rev() {
        if indexed[p - 1].1 == '\n' && indexed[p - 2].1 == '\n' {
            return p;
        }
    }

    // Sentence terminator followed by whitespace (avoids "3.14")
    for p in (min_end..=window_end).rev() {
        let c = indexed[p - 1].1;
        if matches!(c, '.' | '!' | '?')
            && indexed.get(p).map_or(true, |(_, next)| next.is_whitespace())
        {
            return p;
        }
    }

    // Any whitespace
    for p in (min_end..=window_end).rev() {
        if indexed[p - 1].1.is_whitespace() {
            return p;
        }
    }

    // Hard cut
    window_end
}

/// Rebuild document content from its chunks
///
/// Each chunk is an exact substring at a known char span, so writing every
/// chunk into a `total_chars` buffer reproduces the original. Positions not
/// covered by any chunk (possible only when a whitespace-only window was
/// skipped) come back as spaces; the stored checksum lets callers detect
/// that.
pub fn reassemble_content(chunks: &[impl AsChunkSpan], total_chars: u64) -> String {
    let mut buf: Vec<char> = vec![' '; total_chars as usize];
    for chunk in chunks {
        let start = chunk.char_start() as usize;
        for (i, c) in chunk.text().chars().enumerate() {
            if let Some(slot) = buf.get_mut(start + i) {
                *slot = c;
            }
        }
    }
    buf.into_iter().collect()
}

/// Minimal view of a chunk needed for reassembly
pub trait AsChunkSpan {
    /// Starting char offset
    fn char_start(&self) -> u64;
    /// Chunk text
    fn text(&self) -> &str;
}

impl AsChunkSpan for SemanticChunk {
    fn char_start(&self) -> u64 {
        self.char_start
    }
    fn text(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(content: &str, chunks: &[SemanticChunk]) {
        let n = content.chars().count() as u64;
        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks.last().unwrap().char_end, n);
        for pair in chunks.windows(2) {
            assert!(
                pair[1].char_start <= pair[0].char_end,
                "gap between chunk {} and {}",
                pair[0].position,
                pair[1].position
            );
        }
    }

    #[test]
    fn short_input_yields_one_chunk() {
        let chunks = chunk_text("hello world", "d", 512, 64);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].id, "d:c:0");
        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks[0].char_end, 11);
    }

    #[test]
    fn chunking_is_deterministic() {
        let content = "Sentences. More sentences! A question? ".repeat(40);
        let a = chunk_text(&content, "d", 100, 20);
        let b = chunk_text(&content, "d", 100, 20);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.text, y.text);
            assert_eq!((x.char_start, x.char_end), (y.char_start, y.char_end));
        }
    }

    #[test]
    fn chunks_respect_the_size_bound_and_overlap() {
        let content = "word ".repeat(300);
        let chunks = chunk_text(&content, "d", 100, 20);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.char_end - c.char_start <= 100);
            assert!(c.char_start < c.char_end);
        }
        for pair in chunks.windows(2) {
            let prev_len = pair[0].char_end - pair[0].char_start;
            let overlap = pair[0].char_end.saturating_sub(pair[1].char_start);
            if prev_len > 20 {
                assert!(overlap >= 20, "expected >= 20 overlap, got {overlap}");
            }
        }
        assert_covers(&content, &chunks);
    }

    #[test]
    fn positions_are_dense_and_increasing() {
        let content = "alpha beta gamma ".repeat(100);
        let chunks = chunk_text(&content, "d", 64, 16);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.position, i as u32);
            assert_eq!(c.id, format!("d:c:{i}"));
        }
    }

    #[test]
    fn paragraph_break_is_preferred() {
        let first = "First paragraph with some text.";
        let content = format!("{first}\n\nSecond paragraph continues with more text here.");
        let chunks = chunk_text(&content, "d", 48, 8);
        // The window reaches past the blank line; the cut lands right after it
        assert_eq!(
            chunks[0].char_end as usize,
            first.chars().count() + 2,
            "first chunk should end at the paragraph break"
        );
        assert!(chunks[0].text.ends_with("\n\n"));
    }

    #[test]
    fn sentence_boundary_is_preferred_over_whitespace() {
        let content = "A full sentence ends here. trailing words continue without stop";
        let chunks = chunk_text(&content, "d", 40, 4);
        assert!(chunks[0].text.ends_with('.'));
    }

    #[test]
    fn decimal_points_do_not_end_sentences() {
        let content = "The constant pi is 3.14159 approximately and the story then keeps going";
        let chunks = chunk_text(&content, "d", 30, 4);
        assert!(!chunks[0].text.ends_with("3."));
    }

    #[test]
    fn hard_cut_when_no_boundary_exists() {
        let content = "x".repeat(250);
        let chunks = chunk_text(&content, "d", 100, 10);
        assert_eq!(chunks[0].char_end - chunks[0].char_start, 100);
        assert_covers(&content, &chunks);
    }

    #[test]
    fn whitespace_only_windows_are_skipped() {
        let content = format!("{}{}{}", "a".repeat(50), " ".repeat(200), "b".repeat(50));
        let chunks = chunk_text(&content, "d", 50, 0);
        assert!(chunks.iter().all(|c| !c.text.trim().is_empty()));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.position, i as u32);
        }
    }

    #[test]
    fn extreme_overlap_does_not_underflow() {
        // overlap = chunk_size - 1 is legal; a boundary cut close to the
        // window midpoint then lands before start + overlap
        let content = format!("{} {}", "a".repeat(50), "b".repeat(100));
        let chunks = chunk_text(&content, "d", 100, 99);

        assert!(!chunks.is_empty());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.position, i as u32);
            assert!(c.char_start < c.char_end);
            assert!(c.char_end - c.char_start <= 100);
            assert!(!c.text.trim().is_empty());
        }
        assert_eq!(chunks.last().unwrap().char_end, 151);
    }

    #[test]
    fn multibyte_content_slices_on_char_boundaries() {
        let content = "héllo wörld ünïcode ".repeat(30);
        let chunks = chunk_text(&content, "d", 40, 8);
        for c in &chunks {
            assert!(c.char_end - c.char_start <= 40);
            assert_eq!(c.text.chars().count() as u64, c.char_end - c.char_start);
        }
        assert_covers(&content, &chunks);
    }

    #[test]
    fn reassembly_reproduces_the_original() {
        let content =
            "First paragraph.\n\nSecond paragraph with several sentences. Another one here! \
             And a question? Then the tail keeps running on for a while longer."
                .repeat(8);
        let chunks = chunk_text(&content, "d", 96, 24);
        let rebuilt = reassemble_content(&chunks, content.chars().count() as u64);
        assert_eq!(rebuilt, content);
    }
}
