//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Chunks and their embeddings share one table; vectors are stored as
//! little-endian `f32` BLOBs (see [`vec_to_blob`]). Several collections can
//! live in one database file; every query is scoped to this index's
//! collection. Similarity search is a full scan with cosine similarity
//! computed in Rust.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, ScoredChunk, SourceKind};

use super::{rank, IndexEntry, VectorIndex};

/// SQLite implementation of the [`VectorIndex`] trait.
pub struct SqliteIndex {
    pool: SqlitePool,
    collection: String,
}

impl SqliteIndex {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn open(path: &Path, collection: &str) -> Result<Self> {
        let pool = connect(path).await?;
        let index = Self {
            pool,
            collection: collection.to_string(),
        };
        index.migrate().await?;
        Ok(index)
    }

    /// Create tables and indexes. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                source TEXT NOT NULL,
                kind TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                hash TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_collection_source ON chunks(collection, source)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create index directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open index at {}", db_path.display()))?;

    Ok(pool)
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert_batch(&self, entries: &[IndexEntry]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            let chunk = &entry.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, collection, source, kind, chunk_index,
                                    content, hash, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    source = excluded.source,
                    kind = excluded.kind,
                    chunk_index = excluded.chunk_index,
                    content = excluded.content,
                    hash = excluded.hash,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.id)
            .bind(&self.collection)
            .bind(&chunk.source)
            .bind(chunk.kind.as_str())
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.hash)
            .bind(vec_to_blob(&entry.vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn nearest(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source, kind, chunk_index, content, hash, embedding
            FROM chunks
            WHERE collection = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let kind: String = row.get("kind");
            scored.push(ScoredChunk {
                score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                chunk: Chunk {
                    id: row.get("id"),
                    source: row.get("source"),
                    kind: SourceKind::from_str(&kind)?,
                    chunk_index: row.get("chunk_index"),
                    content: row.get("content"),
                    hash: row.get("hash"),
                },
            });
        }

        Ok(rank(scored, k))
    }

    async fn delete_by_source(&self, source: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE collection = ? AND source = ?")
            .bind(&self.collection)
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn list_sources(&self) -> Result<Vec<String>> {
        let sources: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT source FROM chunks WHERE collection = ? ORDER BY source ASC",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }
}
