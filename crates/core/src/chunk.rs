//! Chunk type and reassembly helpers.
//!
//! Chunks are contiguous sub-spans of an item's content produced by recall.
//! They are reassembled in original reading order with an explicit elision
//! marker between non-adjacent spans so the model knows content was skipped.

use serde::{Deserialize, Serialize};

use crate::tokenizer::Tokenizer;

/// Marker inserted between reassembled chunks in place of elided content.
pub const ELISION_MARKER: &str = "\n [...] \n";

/// A contiguous sub-span of an item's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    /// Byte offset of this span in the original content, when the backend
    /// reports one. Used to restore reading order before reassembly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    /// Relevance score from the search backend.
    #[serde(default)]
    pub score: f32,
}

/// Concatenate chunks into one string.
///
/// If the first chunk carries a `start` offset, chunks are sorted by offset
/// first so the output preserves the original reading order regardless of
/// relevance ranking.
pub fn assemble_chunks(mut chunks: Vec<Chunk>) -> String {
    if chunks.first().is_some_and(|c| c.start.is_some()) {
        chunks.sort_by_key(|c| c.start.unwrap_or(usize::MAX));
    }
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join(ELISION_MARKER)
}

/// Keep leading chunks (in relevance order) while they fit in `max_tokens`.
/// Whole chunks only — a chunk that does not fit is dropped, not split.
pub fn truncate_chunks(chunks: Vec<Chunk>, max_tokens: usize, tokenizer: &dyn Tokenizer) -> Vec<Chunk> {
    let mut used = 0usize;
    let mut kept = Vec::new();
    for chunk in chunks {
        let tokens = tokenizer.count(&chunk.content);
        if used + tokens > max_tokens {
            break;
        }
        used += tokens;
        kept.push(chunk);
    }
    kept
}
