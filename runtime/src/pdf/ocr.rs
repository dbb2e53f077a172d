//! OCR for scanned pages: rasterize with pdftoppm, read with tesseract.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::{text, PdfError};
use crate::tools::{self, Tool};

/// Pages with less extracted text than this are sent to OCR.
pub const OCR_TEXT_THRESHOLD: usize = 100;

const RASTER_TIMEOUT: Duration = Duration::from_secs(120);
const TESSERACT_TIMEOUT: Duration = Duration::from_secs(300);

/// pdftoppm + tesseract pair.
#[derive(Debug, Clone)]
pub struct OcrEngine {
    pdftoppm: PathBuf,
    tesseract: PathBuf,
    language: String,
    dpi: u32,
}

impl OcrEngine {
    pub fn new(pdftoppm: PathBuf, tesseract: PathBuf) -> Self {
        Self {
            pdftoppm,
            tesseract,
            language: "eng".to_string(),
            dpi: 300,
        }
    }

    /// Both tools found, or `None`.
    pub fn detect() -> Option<Self> {
        let pdftoppm = tools::locate(Tool::Pdftoppm)?;
        let tesseract = tools::locate(Tool::Tesseract)?;
        Some(Self::new(pdftoppm, tesseract))
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    /// OCR one 1-based page of `pdf`.
    pub async fn ocr_page(&self, pdf: &Path, page: u32) -> Result<String, PdfError> {
        let scratch = tempfile::tempdir().map_err(|source| PdfError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let prefix = scratch.path().join("page");
        let page_arg = page.to_string();
        let dpi_arg = self.dpi.to_string();

        let raster = tools::run_with_timeout(
            &self.pdftoppm,
            [
                OsStr::new("-f"),
                OsStr::new(&page_arg),
                OsStr::new("-l"),
                OsStr::new(&page_arg),
                OsStr::new("-r"),
                OsStr::new(&dpi_arg),
                OsStr::new("-png"),
                OsStr::new("-singlefile"),
                pdf.as_os_str(),
                prefix.as_os_str(),
            ],
            RASTER_TIMEOUT,
        )
        .await?;
        let image = prefix.with_extension("png");
        if !raster.success || !image.exists() {
            return Err(PdfError::Ocr(format!(
                "pdftoppm failed on page {page}: {}",
                raster.error_summary()
            )));
        }

        let recognized = tools::run_with_timeout(
            &self.tesseract,
            [
                image.as_os_str(),
                OsStr::new("stdout"),
                OsStr::new("-l"),
                OsStr::new(&self.language),
            ],
            TESSERACT_TIMEOUT,
        )
        .await?;
        if !recognized.success {
            return Err(PdfError::Ocr(format!(
                "tesseract failed on page {page}: {}",
                recognized.error_summary()
            )));
        }
        Ok(recognized.stdout)
    }
}

/// Text of every page of `pdf`, OCRing pages that have too little text.
///
/// Without an engine, or when OCR of a page fails, the extracted text of
/// that page is kept as is.
pub async fn extract_document_text(pdf: &Path, ocr: Option<&OcrEngine>) -> Result<String, PdfError> {
    let doc = text::load(pdf)?;
    let pages = text::extract_page_texts(&doc);
    drop(doc);

    let mut parts = Vec::with_capacity(pages.len());
    for (page, extracted) in pages {
        let needs_ocr = extracted.trim().chars().count() < OCR_TEXT_THRESHOLD;
        match ocr {
            Some(engine) if needs_ocr => match engine.ocr_page(pdf, page).await {
                Ok(recognized) => {
                    debug!(page, chars = recognized.len(), "page OCR complete");
                    parts.push(recognized);
                }
                Err(e) => {
                    warn!(pdf = %pdf.display(), page, error = %e, "OCR failed, keeping extracted text");
                    parts.push(extracted);
                }
            },
            _ => parts.push(extracted),
        }
    }
    Ok(parts.join("\n"))
}
