//! Core data models used throughout the study assistant.
//!
//! These types represent the chunks and search hits that flow through the
//! ingestion and retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where a chunk's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Plain-text upload (`.txt`, `.md`).
    Txt,
    /// PDF upload, native text layer or OCR.
    Pdf,
    /// Image upload, OCR only.
    Image,
    /// Text pasted directly by the user.
    Manual,
    /// Material ingested only for a one-off summary.
    Temp,
}

/// Image extensions routed through OCR.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "bmp", "tiff", "webp"];

impl SourceKind {
    /// Kind of an uploaded file, judged by extension. Anything that is not
    /// a PDF or an image is read as text.
    pub fn for_filename(filename: &str) -> SourceKind {
        let ext = std::path::Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => SourceKind::Pdf,
            e if IMAGE_EXTENSIONS.contains(&e) => SourceKind::Image,
            _ => SourceKind::Txt,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Txt => "txt",
            SourceKind::Pdf => "pdf",
            SourceKind::Image => "image",
            SourceKind::Manual => "manual",
            SourceKind::Temp => "temp",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "txt" => Ok(SourceKind::Txt),
            "pdf" => Ok(SourceKind::Pdf),
            "image" => Ok(SourceKind::Image),
            "manual" => Ok(SourceKind::Manual),
            "temp" => Ok(SourceKind::Temp),
            other => anyhow::bail!("unknown source kind: '{}'", other),
        }
    }
}

/// Metadata attached to every chunk of one ingested document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    /// Filename, title, or `"manual"`.
    pub source: String,
    pub kind: SourceKind,
}

impl ChunkMeta {
    pub fn new(source: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            source: source.into(),
            kind,
        }
    }
}

/// An immutable unit of retrievable text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub kind: SourceKind,
    /// Position of the chunk within its document.
    pub chunk_index: i64,
    pub content: String,
    /// SHA-256 of `content`.
    pub hash: String,
}

/// A chunk returned from a similarity search, with its cosine similarity.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}
