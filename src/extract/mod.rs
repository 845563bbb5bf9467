//! Text extraction for uploaded PDFs and images.
//!
//! PDFs are read page by page. A page with a native text layer uses it; a
//! page without one is rasterised at `render_scale` × 72 dpi and handed to
//! OCR when OCR is enabled. Images are OCR-only. Recognition asks for the
//! configured language set first (`kor+eng`) and drops to the engine's
//! default language when that pack is missing.
//!
//! Missing OCR tooling degrades to "no text" with a warning. Unreadable
//! input (a corrupt PDF, an OCR crash) is returned as an error for the
//! caller to report.
//!
//! All calls here block on file I/O and child processes; async callers run
//! them under `tokio::task::spawn_blocking`.

pub mod ocr;
pub mod pdf;

use std::sync::Arc;

use anyhow::Result;

use crate::config::OcrConfig;

pub use ocr::{recognize_with_fallback, OcrEngine, OcrError, TesseractOcr};
pub use pdf::{PdfRenderer, PopplerRenderer};

/// Extracts page-marked text from PDF bytes.
#[derive(Clone)]
pub struct PdfExtractor {
    renderer: Arc<dyn PdfRenderer>,
    ocr: Arc<dyn OcrEngine>,
    languages: String,
    render_scale: f32,
}

impl PdfExtractor {
    pub fn new(
        renderer: Arc<dyn PdfRenderer>,
        ocr: Arc<dyn OcrEngine>,
        languages: impl Into<String>,
        render_scale: f32,
    ) -> Self {
        Self {
            renderer,
            ocr,
            languages: languages.into(),
            render_scale,
        }
    }

    /// Poppler + tesseract, configured from `[ocr]`.
    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(
            Arc::new(PopplerRenderer::new(config.pdftoppm_cmd.clone())),
            Arc::new(TesseractOcr::new(config.tesseract_cmd.clone())),
            config.languages.clone(),
            config.render_scale,
        )
    }

    /// Extract every page as `"[페이지 N]\n<text>"`, joined by blank lines.
    /// Pages with no text after OCR are skipped; an all-empty document
    /// yields `""`.
    pub fn extract(&self, bytes: &[u8], use_ocr: bool) -> Result<String> {
        let pages = self.renderer.page_texts(bytes)?;
        let mut parts = Vec::new();

        for (i, native) in pages.iter().enumerate() {
            let page_no = i + 1;
            let mut text = native.trim().to_string();

            if text.is_empty() && use_ocr {
                text = self.ocr_page(bytes, page_no)?;
            }

            if !text.is_empty() {
                parts.push(format!("[페이지 {}]\n{}", page_no, text));
            }
        }

        tracing::debug!(pages = pages.len(), kept = parts.len(), "PDF extracted");
        Ok(parts.join("\n\n"))
    }

    fn ocr_page(&self, bytes: &[u8], page_no: usize) -> Result<String> {
        let recognized = self
            .renderer
            .render_page(bytes, page_no, self.render_scale)
            .and_then(|image| recognize_with_fallback(self.ocr.as_ref(), &image, &self.languages));

        match recognized {
            Ok(text) => Ok(text.trim().to_string()),
            Err(OcrError::Unavailable(msg)) => {
                tracing::warn!(page = page_no, "skipping OCR: {}", msg);
                Ok(String::new())
            }
            Err(e) => Err(anyhow::anyhow!("OCR failed on page {}: {}", page_no, e)),
        }
    }
}

/// Extracts text from image bytes with OCR.
#[derive(Clone)]
pub struct ImageExtractor {
    ocr: Arc<dyn OcrEngine>,
    languages: String,
}

impl ImageExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>, languages: impl Into<String>) -> Self {
        Self {
            ocr,
            languages: languages.into(),
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(
            Arc::new(TesseractOcr::new(config.tesseract_cmd.clone())),
            config.languages.clone(),
        )
    }

    /// Recognised text with surrounding whitespace stripped.
    pub fn extract(&self, bytes: &[u8]) -> Result<String> {
        match recognize_with_fallback(self.ocr.as_ref(), bytes, &self.languages) {
            Ok(text) => Ok(text.trim().to_string()),
            Err(OcrError::Unavailable(msg)) => {
                tracing::warn!("skipping image OCR: {}", msg);
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}
