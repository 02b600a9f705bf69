//! Recursive-separator text chunker with overlap.
//!
//! Each [`Document`] is cut into windows of at most `chunk_size` characters.
//! A window ends right after the last occurrence of the coarsest separator
//! that fits (paragraph break first, then line, sentence, word); finer
//! separators are only consulted when no coarser one fits, and `""` means a
//! hard cut at `chunk_size`. The next window starts exactly `chunk_overlap`
//! characters before the previous one ended, so consecutive chunks share
//! that many characters verbatim.
//!
//! Lengths and offsets are counted in `char`s, never bytes. Chunk ids are
//! UUIDv5 values over `(fingerprint, chunk_index)`, so re-chunking identical
//! content yields identical ids.

use std::collections::HashMap;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document};

/// Split documents into chunks. Indices are contiguous per fingerprint,
/// continuing across the pages of one file.
pub fn split(documents: &[Document], config: &ChunkingConfig) -> Vec<Chunk> {
    let mut next_index: HashMap<&str, i64> = HashMap::new();
    let mut chunks = Vec::new();

    for doc in documents {
        let pieces = split_text(
            &doc.text,
            config.chunk_size,
            config.chunk_overlap,
            &config.separators,
        );
        let counter = next_index.entry(doc.fingerprint.as_str()).or_insert(0);
        for (start, text) in pieces {
            chunks.push(Chunk {
                id: chunk_id(&doc.fingerprint, *counter),
                fingerprint: doc.fingerprint.clone(),
                file_name: doc.file_name.clone(),
                chunk_index: *counter,
                start_index: start as i64,
                origin_offset: doc.origin_offset as i64,
                page: doc.kind.page(),
                text,
            });
            *counter += 1;
        }
    }

    chunks
}

/// Split one string into `(start_offset, text)` windows.
///
/// Whitespace-only windows are dropped.
pub fn split_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &[String],
) -> Vec<(usize, String)> {
    if chunk_size == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let seps: Vec<Vec<char>> = separators.iter().map(|s| s.chars().collect()).collect();
    // Overlap must leave room to advance.
    let overlap = chunk_overlap.min(chunk_size - 1);

    let mut out = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let limit = (start + chunk_size).min(chars.len());
        let end = if limit == chars.len() {
            limit
        } else {
            find_break(&chars, start, limit, overlap, &seps)
        };

        let piece: String = chars[start..end].iter().collect();
        if !piece.trim().is_empty() {
            out.push((start, piece));
        }
        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }
    out
}

/// Pick the end of the window `[start, limit)`.
///
/// The end must lie strictly beyond `start + overlap` so the next window
/// makes progress.
fn find_break(
    chars: &[char],
    start: usize,
    limit: usize,
    overlap: usize,
    seps: &[Vec<char>],
) -> usize {
    let min_end = start + overlap + 1;
    for sep in seps {
        if sep.is_empty() {
            return limit;
        }
        let len = sep.len();
        let mut end = limit;
        while end >= min_end && end >= start + len {
            if chars[end - len..end] == sep[..] {
                return end;
            }
            end -= 1;
        }
    }
    limit
}

fn chunk_id(fingerprint: &str, index: i64) -> String {
    let name = format!("{}:{}", fingerprint, index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}
