//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the boundary between the document store and
//! whatever persists embeddings. Two backends ship with the crate:
//!
//! | Backend | Struct | Notes |
//! |---------|--------|-------|
//! | `memory` | [`InMemoryIndex`] | brute-force cosine scan behind one `RwLock` |
//! | `sqlite` | [`SqliteIndex`] | persistent, one transaction per batch |
//!
//! # Atomicity
//!
//! [`upsert_batch`](VectorIndex::upsert_batch) receives every chunk of one
//! document at once. Implementations must make the whole batch visible to
//! searchers at once or not at all; concurrent searches may observe the
//! index before or after the batch, never a mix.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, ScoredChunk};

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

/// A chunk together with its embedding.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Abstract storage backend for embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace every entry of the batch atomically.
    async fn upsert_batch(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Return up to `k` chunks ranked by cosine similarity, best first.
    /// Ties keep insertion order so repeated searches are stable.
    async fn nearest(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Delete every chunk whose source matches; returns how many went.
    async fn delete_by_source(&self, source: &str) -> Result<usize>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;

    /// Number of stored chunks.
    async fn count(&self) -> Result<usize>;

    /// Distinct source names, sorted.
    async fn list_sources(&self) -> Result<Vec<String>>;
}

/// Sort scored chunks best-first, keeping the original order on ties.
pub(crate) fn rank(mut scored: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);
    scored
}
