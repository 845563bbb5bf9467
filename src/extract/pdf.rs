//! PDF page access: native text per page and page rasterisation.

use std::io::ErrorKind;
use std::process::Command;

use anyhow::{Context, Result};

use super::ocr::OcrError;

/// Page enumeration, native text, and rasterisation for one PDF.
pub trait PdfRenderer: Send + Sync {
    /// Native text layer of every page, in page order.
    fn page_texts(&self, pdf: &[u8]) -> Result<Vec<String>>;

    /// Render one page (1-based) to PNG at `scale` × 72 dpi.
    fn render_page(&self, pdf: &[u8], page: usize, scale: f32) -> Result<Vec<u8>, OcrError>;
}

/// `pdf-extract` for text, poppler's `pdftoppm` for rasterisation.
pub struct PopplerRenderer {
    pdftoppm_cmd: String,
}

impl PopplerRenderer {
    pub fn new(pdftoppm_cmd: impl Into<String>) -> Self {
        Self {
            pdftoppm_cmd: pdftoppm_cmd.into(),
        }
    }
}

impl Default for PopplerRenderer {
    fn default() -> Self {
        Self::new("pdftoppm")
    }
}

impl PdfRenderer for PopplerRenderer {
    fn page_texts(&self, pdf: &[u8]) -> Result<Vec<String>> {
        pdf_extract::extract_text_from_mem_by_pages(pdf)
            .map_err(|e| anyhow::anyhow!("PDF extraction failed: {}", e))
    }

    fn render_page(&self, pdf: &[u8], page: usize, scale: f32) -> Result<Vec<u8>, OcrError> {
        let dir = tempfile::TempDir::new()
            .map_err(|e| OcrError::Failed(format!("failed to create temp dir: {}", e)))?;
        let pdf_path = dir.path().join("input.pdf");
        std::fs::write(&pdf_path, pdf)
            .map_err(|e| OcrError::Failed(format!("failed to write temp PDF: {}", e)))?;

        let page_arg = page.to_string();
        let dpi = ((72.0 * scale).round() as u32).max(1).to_string();
        let output = Command::new(&self.pdftoppm_cmd)
            .args(["-f", &page_arg, "-l", &page_arg, "-r", &dpi, "-png"])
            .arg(&pdf_path)
            .arg(dir.path().join("page"))
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    OcrError::Unavailable(format!("'{}' not found", self.pdftoppm_cmd))
                }
                _ => OcrError::Failed(format!("failed to run '{}': {}", self.pdftoppm_cmd, e)),
            })?;

        if !output.status.success() {
            return Err(OcrError::Failed(format!(
                "pdftoppm error: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // pdftoppm zero-pads the page number depending on page count.
        let png = find_png(dir.path())
            .map_err(|e| OcrError::Failed(e.to_string()))?
            .ok_or_else(|| OcrError::Failed(format!("pdftoppm produced no image for page {}", page)))?;
        std::fs::read(&png).map_err(|e| OcrError::Failed(format!("failed to read render: {}", e)))
    }
}

fn find_png(dir: &std::path::Path) -> Result<Option<std::path::PathBuf>> {
    let mut pngs: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
        .collect();
    pngs.sort();
    Ok(pngs.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_an_extraction_error() {
        let renderer = PopplerRenderer::default();
        assert!(renderer.page_texts(b"not a pdf").is_err());
    }

    #[test]
    fn missing_rasteriser_is_unavailable() {
        let renderer = PopplerRenderer::new("definitely-not-pdftoppm-xyz");
        let err = renderer.render_page(b"%PDF-1.4", 1, 2.0).unwrap_err();
        assert!(matches!(err, OcrError::Unavailable(_)));
    }

    #[test]
    fn find_png_picks_rendered_page() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("input.pdf"), b"x").unwrap();
        assert!(find_png(dir.path()).unwrap().is_none());
        std::fs::write(dir.path().join("page-03.png"), b"png").unwrap();
        let found = find_png(dir.path()).unwrap().unwrap();
        assert!(found.ends_with("page-03.png"));
    }
}
