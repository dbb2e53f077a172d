//! PDF toolkit: text and image page generation, merging with embedded
//! files, text extraction and OCR.

pub mod merge;
pub mod ocr;
pub mod text;
pub mod writer;

use std::path::PathBuf;

use crate::tools::ToolError;

pub use merge::PdfMerger;
pub use ocr::OcrEngine;
pub use writer::{image_document, TextDocument, TextStyle};

/// Errors from building, reading or rewriting PDFs.
#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("PDF error: {0}")]
    Lopdf(#[from] lopdf::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to save {}: {detail}", path.display())]
    Save { path: PathBuf, detail: String },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("document has no pages")]
    NoPages,
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("OCR failed: {0}")]
    Ocr(String),
    #[error("conversion failed: {0}")]
    Conversion(String),
}

/// Save a document, creating parent directories.
pub(crate) fn save_document(doc: &mut lopdf::Document, path: &std::path::Path) -> Result<(), PdfError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| PdfError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    doc.save(path).map_err(|e| PdfError::Save {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(())
}
