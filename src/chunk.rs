//! Recursive separator-cascade text splitter.
//!
//! Splits extracted document text into overlapping chunks that prefer the
//! most meaningful break available inside the size budget. Lengths are
//! measured in characters (Unicode scalar values), not bytes, so Korean
//! and English text are budgeted the same way.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from the cascade
//!    (`"\n\n"`, `"\n"`, `"."`, `"!"`, `"?"`, `","`, `" "`, `""`) that
//!    occurs in the text. The empty separator splits into characters.
//! 2. Split on it, keeping the separator at the start of the following
//!    piece so no characters are lost.
//! 3. Pieces shorter than `chunk_size` are merged greedily into chunks.
//!    When a chunk is emitted, trailing pieces totalling at most
//!    `chunk_overlap` characters are carried into the next chunk.
//! 4. Pieces that are too long are split again with the remaining,
//!    finer separators.
//! 5. Every chunk is whitespace-trimmed; empty chunks are dropped.
//!
//! # Example
//!
//! ```rust
//! use orange_rag::chunk::TextSplitter;
//!
//! let splitter = TextSplitter::new(500, 50);
//! let chunks = splitter.split("Python은 간결한 언어다.");
//! assert_eq!(chunks, vec!["Python은 간결한 언어다.".to_string()]);
//! ```

use std::collections::VecDeque;

use crate::config::ChunkingConfig;

/// Separator cascade, most to least semantically significant.
pub const SEPARATORS: [&str; 8] = ["\n\n", "\n", ".", "!", "?", ",", " ", ""];

/// Splits text into overlapping chunks of at most `chunk_size` characters.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// `chunk_overlap` must be smaller than `chunk_size`; config loading
    /// enforces this.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split `text` into ordered, non-empty, trimmed chunks.
    ///
    /// Returns an empty vector for empty or whitespace-only input.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
            .into_iter()
            .filter_map(|c| {
                let trimmed = c.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect()
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut good: Vec<String> = Vec::new();

        for piece in split_keep_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                chunks.extend(self.merge(&good));
                good.clear();
            }
            if finer.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_with(&piece, finer));
            }
        }

        if !good.is_empty() {
            chunks.extend(self.merge(&good));
        }
        chunks
    }

    /// Greedily merge small pieces into chunks, carrying an overlap window.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                if let Some(doc) = join_pieces(&current) {
                    docs.push(doc);
                }
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            current.push_back((piece.as_str(), len));
            total += len;
        }

        if let Some(doc) = join_pieces(&current) {
            docs.push(doc);
        }
        docs
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(500, 50)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join_pieces(pieces: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = pieces.iter().map(|(p, _)| *p).collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split on `separator`, attaching each separator to the start of the
/// piece that follows it. Empty pieces are discarded.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(text[start..pos].to_string());
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}
