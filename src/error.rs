//! Error types callers need to tell apart.
//!
//! Glue code uses `anyhow`; these variants exist where the caller's reaction
//! differs (retry a quiz, show an apology, report a bad upload).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The language-model backend was unreachable, returned an HTTP error,
    /// or sent a payload we could not read.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The model answered, but not with the structured JSON we asked for.
    #[error("malformed quiz output: {0}")]
    QuizFormat(String),

    /// An upload could not be read (corrupt PDF, unreadable image).
    #[error("extraction failed for '{source_name}': {message}")]
    Extraction {
        source_name: String,
        message: String,
    },

    /// Embedding or index write failed while adding a document.
    #[error("ingestion failed: {0}")]
    Ingestion(String),

    /// A streaming request was cancelled before completion.
    #[error("generation cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn generation(err: impl std::fmt::Display) -> Self {
        PipelineError::Generation(err.to_string())
    }

    pub fn ingestion(err: impl std::fmt::Display) -> Self {
        PipelineError::Ingestion(err.to_string())
    }

    /// True for failures a user can fix by simply trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Generation(_) | PipelineError::QuizFormat(_) | PipelineError::Cancelled
        )
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Generation(err.to_string())
    }
}
