//! Query-side access to the document store.
//!
//! Queries are embedded with the `"query: "` role prefix that e5-family
//! models expect; passages were embedded without one at ingestion.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::models::{Chunk, ScoredChunk};
use crate::store::DocumentStore;

pub const QUERY_PREFIX: &str = "query: ";

const PREVIEW_CHARS: usize = 200;

/// A retrieved chunk as shown to the user next to an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// 1-based position in the context block.
    pub index: usize,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// First 200 characters of the chunk, with `...` when truncated.
    pub preview: String,
}

impl Citation {
    fn from_chunk(index: usize, chunk: &Chunk) -> Self {
        Self {
            index,
            source: chunk.source.clone(),
            kind: chunk.kind.as_str().to_string(),
            preview: preview(&chunk.content),
        }
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let head: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        content.to_string()
    }
}

#[derive(Clone)]
pub struct Retriever {
    store: Arc<DocumentStore>,
}

impl Retriever {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Up to `k` chunks, most similar first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
        self.store.similarity_search(&with_prefix(query), k).await
    }

    pub async fn search_with_score(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        self.store
            .similarity_search_with_score(&with_prefix(query), k)
            .await
    }

    /// Numbered `[i] (출처: source)` blocks separated by blank lines, or
    /// `""` when nothing was retrieved.
    pub async fn retrieve_context(&self, query: &str, k: usize) -> Result<String> {
        let chunks = self.search(query, k).await?;
        Ok(chunks
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] (출처: {})\n{}", i + 1, c.source, c.content))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Context in the `[문서 i] (출처: source)` form used inside prompts,
    /// plus one citation per chunk.
    pub async fn retrieve_with_sources(
        &self,
        query: &str,
        k: usize,
    ) -> Result<(String, Vec<Citation>)> {
        let chunks = self.search(query, k).await?;
        let context = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[문서 {}] (출처: {})\n{}", i + 1, c.source, c.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let citations = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| Citation::from_chunk(i + 1, c))
            .collect();
        Ok((context, citations))
    }
}

fn with_prefix(query: &str) -> String {
    format!("{}{}", QUERY_PREFIX, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    fn chunk(content: &str) -> Chunk {
        Chunk {
            id: "1".into(),
            source: "notes.pdf".into(),
            kind: SourceKind::Pdf,
            chunk_index: 0,
            content: content.into(),
            hash: String::new(),
        }
    }

    #[test]
    fn short_preview_is_untouched() {
        let c = Citation::from_chunk(1, &chunk("짧은 내용"));
        assert_eq!(c.preview, "짧은 내용");
        assert_eq!(c.kind, "pdf");
    }

    #[test]
    fn long_preview_is_truncated_by_chars() {
        let content = "가".repeat(250);
        let c = Citation::from_chunk(2, &chunk(&content));
        assert_eq!(c.preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(c.preview.ends_with("..."));
    }

    #[test]
    fn citation_serializes_kind_as_type() {
        let json = serde_json::to_value(Citation::from_chunk(1, &chunk("x"))).unwrap();
        assert_eq!(json["type"], "pdf");
        assert_eq!(json["index"], 1);
    }

    #[test]
    fn query_prefix_is_applied() {
        assert_eq!(with_prefix("RAG가 뭐야?"), "query: RAG가 뭐야?");
    }
}
