//! The document store: splitter, embedder and vector index behind one handle.
//!
//! Every document is split, embedded in full, and only then written to the
//! index as a single batch, so searchers see all of a document's chunks or
//! none of them. Text that is empty after trimming is ignored.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::chunk::TextSplitter;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{PipelineError, Result};
use crate::extract::{ImageExtractor, PdfExtractor};
use crate::index::{IndexEntry, VectorIndex};
use crate::models::{Chunk, ChunkMeta, ScoredChunk, SourceKind};

/// Collection name and size.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CollectionStats {
    pub name: String,
    pub count: usize,
}

pub struct DocumentStore {
    splitter: TextSplitter,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    pdf: PdfExtractor,
    image: ImageExtractor,
    ocr_enabled: bool,
}

impl DocumentStore {
    /// A store with the default tesseract/poppler extractors.
    pub fn new(
        splitter: TextSplitter,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
    ) -> Self {
        let ocr = crate::config::OcrConfig::default();
        Self {
            splitter,
            embedder,
            index,
            collection: collection.into(),
            pdf: PdfExtractor::from_config(&ocr),
            image: ImageExtractor::from_config(&ocr),
            ocr_enabled: ocr.enabled,
        }
    }

    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            splitter: TextSplitter::from_config(&config.chunking),
            embedder,
            index,
            collection: config.index.collection.clone(),
            pdf: PdfExtractor::from_config(&config.ocr),
            image: ImageExtractor::from_config(&config.ocr),
            ocr_enabled: config.ocr.enabled,
        }
    }

    /// Replace the PDF and image extractors.
    pub fn with_extractors(mut self, pdf: PdfExtractor, image: ImageExtractor) -> Self {
        self.pdf = pdf;
        self.image = image;
        self
    }

    /// Split, embed and store one document. Returns the new chunk ids in
    /// document order; empty text yields no ids and touches nothing.
    pub async fn add_document(&self, text: &str, meta: &ChunkMeta) -> Result<Vec<String>> {
        self.add_documents(&[(text.to_string(), meta.clone())]).await
    }

    /// Store several documents as one batch.
    pub async fn add_documents(&self, docs: &[(String, ChunkMeta)]) -> Result<Vec<String>> {
        let mut chunks = Vec::new();
        for (text, meta) in docs {
            for (i, content) in self.splitter.split(text).into_iter().enumerate() {
                chunks.push(Chunk {
                    id: uuid::Uuid::new_v4().to_string(),
                    source: meta.source.clone(),
                    kind: meta.kind,
                    chunk_index: i as i64,
                    hash: format!("{:x}", Sha256::digest(content.as_bytes())),
                    content,
                });
            }
        }

        if chunks.is_empty() {
            tracing::debug!("nothing to ingest");
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(PipelineError::ingestion)?;
        if vectors.len() != chunks.len() {
            return Err(PipelineError::Ingestion(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();

        self.index
            .upsert_batch(&entries)
            .await
            .map_err(PipelineError::ingestion)?;

        tracing::info!(chunks = ids.len(), documents = docs.len(), "ingested");
        Ok(ids)
    }

    /// Extract a PDF (OCR for text-less pages when `use_ocr` and OCR is
    /// enabled) and store it under `filename` with kind `pdf`.
    pub async fn add_pdf(&self, bytes: Vec<u8>, filename: &str, use_ocr: bool) -> Result<Vec<String>> {
        let extractor = self.pdf.clone();
        let use_ocr = use_ocr && self.ocr_enabled;
        let text = run_extraction(filename, move || extractor.extract(&bytes, use_ocr)).await?;
        self.add_document(&text, &ChunkMeta::new(filename, SourceKind::Pdf))
            .await
    }

    /// OCR an image and store it under `filename` with kind `image`.
    pub async fn add_image(&self, bytes: Vec<u8>, filename: &str) -> Result<Vec<String>> {
        if !self.ocr_enabled {
            tracing::warn!(source = filename, "OCR disabled, image not ingested");
            return Ok(Vec::new());
        }
        let extractor = self.image.clone();
        let text = run_extraction(filename, move || extractor.extract(&bytes)).await?;
        self.add_document(&text, &ChunkMeta::new(filename, SourceKind::Image))
            .await
    }

    /// Store an upload of the given kind under `source`: PDFs and images
    /// go through extraction, anything else is read as UTF-8 text.
    pub async fn add_file(
        &self,
        bytes: Vec<u8>,
        kind: SourceKind,
        source: &str,
        use_ocr: bool,
    ) -> Result<Vec<String>> {
        match kind {
            SourceKind::Pdf => self.add_pdf(bytes, source, use_ocr).await,
            SourceKind::Image => self.add_image(bytes, source).await,
            kind => {
                let text = String::from_utf8_lossy(&bytes);
                self.add_document(&text, &ChunkMeta::new(source, kind)).await
            }
        }
    }

    /// Plain text of an upload without storing it, extracted the same way
    /// [`add_file`](Self::add_file) would.
    pub async fn extract_text(&self, bytes: Vec<u8>, kind: SourceKind, source: &str) -> Result<String> {
        match kind {
            SourceKind::Pdf => {
                let extractor = self.pdf.clone();
                let use_ocr = self.ocr_enabled;
                run_extraction(source, move || extractor.extract(&bytes, use_ocr)).await
            }
            SourceKind::Image if !self.ocr_enabled => Ok(String::new()),
            SourceKind::Image => {
                let extractor = self.image.clone();
                run_extraction(source, move || extractor.extract(&bytes)).await
            }
            _ => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    /// Nearest chunks for an already-prefixed query text.
    pub async fn similarity_search(&self, text: &str, k: usize) -> anyhow::Result<Vec<Chunk>> {
        Ok(self
            .similarity_search_with_score(text, k)
            .await?
            .into_iter()
            .map(|hit| hit.chunk)
            .collect())
    }

    pub async fn similarity_search_with_score(
        &self,
        text: &str,
        k: usize,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        let vector = self.embedder.embed(text).await?;
        self.index.nearest(&vector, k).await
    }

    /// Remove every chunk from `source`; returns how many were deleted.
    pub async fn delete_source(&self, source: &str) -> anyhow::Result<usize> {
        let removed = self.index.delete_by_source(source).await?;
        tracing::info!(source, removed, "source deleted");
        Ok(removed)
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        self.index.clear().await?;
        tracing::info!(collection = %self.collection, "collection cleared");
        Ok(())
    }

    pub async fn stats(&self) -> anyhow::Result<CollectionStats> {
        Ok(CollectionStats {
            name: self.collection.clone(),
            count: self.index.count().await?,
        })
    }

    pub async fn sources(&self) -> anyhow::Result<Vec<String>> {
        self.index.list_sources().await
    }
}

async fn run_extraction<F>(source_name: &str, job: F) -> Result<String>
where
    F: FnOnce() -> anyhow::Result<String> + Send + 'static,
{
    let extraction_error = |message: String| PipelineError::Extraction {
        source_name: source_name.to_string(),
        message,
    };
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| extraction_error(e.to_string()))?
        .map_err(|e| extraction_error(format!("{:#}", e)))
}
