//! In-memory [`VectorIndex`] implementation for tests and ephemeral sessions.
//!
//! Entries live in a single `Vec` behind `std::sync::RwLock`, so a batch
//! upsert takes the write lock once and readers never see half a document.
//! Search is brute-force cosine similarity over all stored vectors.

use std::collections::BTreeSet;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::ScoredChunk;

use super::{rank, IndexEntry, VectorIndex};

/// In-memory vector index.
pub struct InMemoryIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert_batch(&self, batch: &[IndexEntry]) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.retain(|e| !batch.iter().any(|b| b.chunk.id == e.chunk.id));
        entries.extend(batch.iter().cloned());
        Ok(())
    }

    async fn nearest(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let entries = self.entries.read().unwrap();
        let scored = entries
            .iter()
            .map(|e| ScoredChunk {
                chunk: e.chunk.clone(),
                score: cosine_similarity(query_vec, &e.vector),
            })
            .collect();
        Ok(rank(scored, k))
    }

    async fn delete_by_source(&self, source: &str) -> Result<usize> {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|e| e.chunk.source != source);
        Ok(before - entries.len())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().unwrap().clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().unwrap().len())
    }

    async fn list_sources(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().unwrap();
        let sources: BTreeSet<String> = entries.iter().map(|e| e.chunk.source.clone()).collect();
        Ok(sources.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, SourceKind};

    fn entry(id: &str, source: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: id.to_string(),
                source: source.to_string(),
                kind: SourceKind::Txt,
                chunk_index: 0,
                content: format!("content of {}", id),
                hash: String::new(),
            },
            vector,
        }
    }

    #[tokio::test]
    async fn nearest_ranks_by_similarity() {
        let index = InMemoryIndex::new();
        index
            .upsert_batch(&[
                entry("a", "doc1", vec![1.0, 0.0]),
                entry("b", "doc2", vec![0.0, 1.0]),
                entry("c", "doc3", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = index.nearest(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, "a");
        assert_eq!(hits[1].chunk.id, "c");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let index = InMemoryIndex::new();
        assert!(index.nearest(&[1.0, 0.0], 3).await.unwrap().is_empty());
        assert_eq!(index.count().await.unwrap(), 0);
        assert!(index.list_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_by_source_and_clear() {
        let index = InMemoryIndex::new();
        index
            .upsert_batch(&[
                entry("a", "doc1", vec![1.0, 0.0]),
                entry("b", "doc1", vec![0.5, 0.5]),
                entry("c", "doc2", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(index.list_sources().await.unwrap(), vec!["doc1", "doc2"]);
        assert_eq!(index.delete_by_source("doc1").await.unwrap(), 2);
        assert_eq!(index.count().await.unwrap(), 1);

        index.clear().await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_replaces_same_id() {
        let index = InMemoryIndex::new();
        index.upsert_batch(&[entry("a", "doc1", vec![1.0, 0.0])]).await.unwrap();
        index.upsert_batch(&[entry("a", "doc1", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        let hits = index.nearest(&[0.0, 1.0], 1).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }
}
