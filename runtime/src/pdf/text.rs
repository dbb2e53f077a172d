//! Reading PDFs: page counts and per-page text.

use lopdf::Document;
use std::path::Path;
use tracing::debug;

use super::PdfError;

/// Load a document from disk.
pub fn load(path: &Path) -> Result<Document, PdfError> {
    Ok(Document::load(path)?)
}

/// Number of pages in a PDF file.
pub fn page_count(path: &Path) -> Result<usize, PdfError> {
    Ok(load(path)?.get_pages().len())
}

/// `(page_number, text)` for every page, 1-based.
///
/// Pages whose text cannot be decoded come back empty rather than failing
/// the whole document.
pub fn extract_page_texts(doc: &Document) -> Vec<(u32, String)> {
    doc.get_pages()
        .keys()
        .map(|&page| {
            let text = doc.extract_text(&[page]).unwrap_or_else(|e| {
                debug!(page, error = %e, "no extractable text");
                String::new()
            });
            (page, text)
        })
        .collect()
}

/// Whether the first page carries any extractable text.
pub fn first_page_has_text(path: &Path) -> bool {
    let Ok(doc) = load(path) else {
        return false;
    };
    let first = doc.get_pages().keys().next().copied();
    match first {
        Some(page) => doc
            .extract_text(&[page])
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false),
        None => false,
    }
}
