//! Optical character recognition through an external `tesseract` binary.

use std::io::ErrorKind;
use std::process::Command;

use thiserror::Error;

/// Why a recognition attempt produced no text.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The requested language pack is not installed.
    #[error("OCR language '{0}' is not available")]
    UnsupportedLanguage(String),

    /// The engine (or the rasteriser feeding it) is not installed.
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),

    #[error("OCR failed: {0}")]
    Failed(String),
}

/// Turns an encoded image (PNG, JPEG, ...) into text.
pub trait OcrEngine: Send + Sync {
    /// Recognise `image`. `None` selects the engine's default language.
    fn recognize(&self, image: &[u8], language: Option<&str>) -> Result<String, OcrError>;
}

/// Try `languages` first; if the engine lacks that pack, retry once with
/// its default language. Any other error is returned as-is.
pub fn recognize_with_fallback(
    engine: &dyn OcrEngine,
    image: &[u8],
    languages: &str,
) -> Result<String, OcrError> {
    match engine.recognize(image, Some(languages)) {
        Err(OcrError::UnsupportedLanguage(lang)) => {
            tracing::warn!(language = %lang, "OCR language pack missing, using default language");
            engine.recognize(image, None)
        }
        other => other,
    }
}

/// [`OcrEngine`] backed by the `tesseract` command-line tool.
pub struct TesseractOcr {
    cmd: String,
}

impl TesseractOcr {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &[u8], language: Option<&str>) -> Result<String, OcrError> {
        let dir = tempfile::TempDir::new()
            .map_err(|e| OcrError::Failed(format!("failed to create temp dir: {}", e)))?;
        let image_path = dir.path().join("input.img");
        std::fs::write(&image_path, image)
            .map_err(|e| OcrError::Failed(format!("failed to write temp image: {}", e)))?;

        let mut command = Command::new(&self.cmd);
        command.arg(&image_path).arg("stdout");
        if let Some(lang) = language {
            command.args(["-l", lang]);
        }

        let output = command.output().map_err(|e| match e.kind() {
            ErrorKind::NotFound => OcrError::Unavailable(format!("'{}' not found", self.cmd)),
            _ => OcrError::Failed(format!("failed to run '{}': {}", self.cmd, e)),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, language));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        tracing::debug!(chars = text.chars().count(), ?language, "tesseract finished");
        Ok(text)
    }
}

fn classify_failure(stderr: &str, language: Option<&str>) -> OcrError {
    let missing_pack =
        stderr.contains("Failed loading language") || stderr.contains("Error opening data file");
    match language {
        Some(lang) if missing_pack => OcrError::UnsupportedLanguage(lang.to_string()),
        _ => OcrError::Failed(stderr.trim().to_string()),
    }
}
