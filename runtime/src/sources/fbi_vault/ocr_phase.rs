//! Text extraction over tracked PDFs.

use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::parse;
use super::tracker::{OcrStatus, ResultsStore, Tracker, VaultDocument};
use crate::acquisition::PageSource;
use crate::pdf::ocr::{extract_document_text, OcrEngine};

/// Bodies at or under this many characters count as failed extraction.
pub const MIN_BODY_CHARS: usize = 50;

/// Settings for the OCR passes.
#[derive(Debug, Clone)]
pub struct OcrPhaseOptions {
    pub passes: u32,
    pub pass_pause: Duration,
    /// Re-read the document page's `<h1>` for the result title.
    pub refresh_titles: bool,
    pub keep_pdfs: bool,
}

impl Default for OcrPhaseOptions {
    fn default() -> Self {
        Self {
            passes: 3,
            pass_pause: Duration::from_secs(10),
            refresh_titles: true,
            keep_pdfs: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OcrPhaseReport {
    pub passes: u32,
    pub completed: usize,
    pub failed_attempts: usize,
    /// Entries still not complete after the last pass.
    pub remaining: Vec<String>,
}

impl OcrPhaseReport {
    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Run up to `options.passes` passes over the tracked PDFs that are not
/// complete, appending a result for each one that yields text.
pub async fn run_ocr_phase(
    tracker: &mut Tracker,
    results: &mut ResultsStore,
    source: Option<&dyn PageSource>,
    ocr: Option<&OcrEngine>,
    options: &OcrPhaseOptions,
) -> Result<OcrPhaseReport> {
    let mut report = OcrPhaseReport::default();
    let source = if options.refresh_titles { source } else { None };
    if ocr.is_none() {
        warn!("pdftoppm/tesseract not available, scanned pages will yield no text");
    }

    for pass in 1..=options.passes.max(1) {
        let pending: Vec<usize> = tracker
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.ocr != OcrStatus::Complete)
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            break;
        }
        report.passes = pass;
        info!(pass, documents = pending.len(), "OCR pass");

        for idx in pending {
            let entry = tracker.entries()[idx].clone();
            let status = match process_entry(&entry.path, &entry.url, &entry.title, source, ocr).await {
                Some(document) => {
                    results.push(document)?;
                    if !options.keep_pdfs {
                        if let Err(e) = std::fs::remove_file(&entry.path) {
                            warn!(path = %entry.path, error = %e, "could not delete PDF");
                        }
                    }
                    report.completed += 1;
                    OcrStatus::Complete
                }
                None => {
                    report.failed_attempts += 1;
                    OcrStatus::Failed
                }
            };
            tracker.set_status(idx, status)?;
        }

        let left = tracker.counts();
        if left.all_complete() {
            break;
        }
        if pass < options.passes {
            info!(remaining = left.total - left.complete, "waiting before next OCR pass");
            tokio::time::sleep(options.pass_pause).await;
        }
    }

    report.remaining = tracker
        .incomplete()
        .into_iter()
        .map(|e| e.path.clone())
        .collect();
    Ok(report)
}

async fn process_entry(
    pdf_path: &str,
    url: &str,
    title: &str,
    source: Option<&dyn PageSource>,
    ocr: Option<&OcrEngine>,
) -> Option<VaultDocument> {
    let path = Path::new(pdf_path);
    if !path.exists() {
        warn!(path = pdf_path, "tracked PDF is missing");
        return None;
    }

    let mut title = title.to_string();
    if let Some(source) = source {
        match source.fetch_html(url).await {
            Ok(page) => {
                if let Some(fresh) = parse::parse_document_title(&page.html) {
                    title = fresh;
                }
            }
            Err(e) => warn!(url, error = %e, "could not refresh title"),
        }
    }

    let body = match extract_document_text(path, ocr).await {
        Ok(text) => text,
        Err(e) => {
            warn!(path = pdf_path, error = %e, "text extraction failed");
            return None;
        }
    };
    let body = body.trim();
    if body.chars().count() <= MIN_BODY_CHARS {
        warn!(path = pdf_path, chars = body.chars().count(), "too little text extracted");
        return None;
    }

    info!(title = %title, chars = body.len(), "extracted document text");
    Some(VaultDocument {
        date: Local::now().format("%Y-%m-%d").to_string(),
        title,
        body: body.to_string(),
        url: url.to_string(),
        pdf_path: pdf_path.to_string(),
    })
}
