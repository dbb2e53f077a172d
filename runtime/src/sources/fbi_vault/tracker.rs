//! Tracking and results files for a Vault search term.
//!
//! The tracking file is the resume point: every downloaded PDF is recorded
//! with its OCR state, and the file is rewritten after every change.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::storage;

/// OCR state of a downloaded PDF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrStatus {
    #[default]
    Pending,
    Complete,
    Failed,
}

impl std::fmt::Display for OcrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OcrStatus::Pending => "pending",
            OcrStatus::Complete => "complete",
            OcrStatus::Failed => "failed",
        })
    }
}

/// One entry of `downloaded_<term>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPdf {
    pub path: String,
    /// Document page URL, the identity used for "already downloaded".
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub ocr: OcrStatus,
}

/// Counts by OCR state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OcrCounts {
    pub total: usize,
    pub complete: usize,
    pub pending: usize,
    pub failed: usize,
}

impl OcrCounts {
    pub fn all_complete(&self) -> bool {
        self.complete == self.total
    }
}

/// The tracking file for one search term.
#[derive(Debug)]
pub struct Tracker {
    path: PathBuf,
    entries: Vec<TrackedPdf>,
}

impl Tracker {
    /// Load the tracking file; a missing or corrupt file starts empty.
    pub fn load(path: &Path) -> Self {
        let entries: Vec<TrackedPdf> = storage::load_json_or_default(path);
        if !entries.is_empty() {
            info!(count = entries.len(), path = %path.display(), "loaded previously downloaded PDFs");
        }
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[TrackedPdf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.entries.iter().any(|e| e.url == url)
    }

    /// Record a new download as pending and save.
    pub fn record(&mut self, path: &Path, url: &str, title: &str) -> Result<()> {
        self.entries.push(TrackedPdf {
            path: path.display().to_string(),
            url: url.to_string(),
            title: title.to_string(),
            ocr: OcrStatus::Pending,
        });
        self.save()
    }

    /// Update the OCR state of entry `idx` and save.
    pub fn set_status(&mut self, idx: usize, status: OcrStatus) -> Result<()> {
        if let Some(entry) = self.entries.get_mut(idx) {
            entry.ocr = status;
        }
        self.save()
    }

    pub fn counts(&self) -> OcrCounts {
        let mut counts = OcrCounts {
            total: self.entries.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.ocr {
                OcrStatus::Complete => counts.complete += 1,
                OcrStatus::Pending => counts.pending += 1,
                OcrStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Entries not yet complete.
    pub fn incomplete(&self) -> Vec<&TrackedPdf> {
        self.entries
            .iter()
            .filter(|e| e.ocr != OcrStatus::Complete)
            .collect()
    }

    pub fn save(&self) -> Result<()> {
        storage::write_json_pretty(&self.path, &self.entries)
    }
}

/// One OCR'd document in `fbi_vault_<term>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultDocument {
    pub date: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub pdf_path: String,
}

/// The results file, rewritten after every appended document.
#[derive(Debug)]
pub struct ResultsStore {
    path: PathBuf,
    documents: Vec<VaultDocument>,
}

impl ResultsStore {
    pub fn load(path: &Path) -> Self {
        let documents: Vec<VaultDocument> = storage::load_json_or_default(path);
        if !documents.is_empty() {
            info!(count = documents.len(), "loaded existing OCR results");
        }
        Self {
            path: path.to_path_buf(),
            documents,
        }
    }

    pub fn documents(&self) -> &[VaultDocument] {
        &self.documents
    }

    pub fn push(&mut self, document: VaultDocument) -> Result<()> {
        self.documents.push(document);
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        storage::write_json_pretty(&self.path, &self.documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        let entry = TrackedPdf {
            path: "p.pdf".into(),
            url: "https://vault.fbi.gov/x".into(),
            title: "X".into(),
            ocr: OcrStatus::Complete,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["ocr"], "complete");
    }

    #[test]
    fn test_missing_status_defaults_to_pending() {
        let entry: TrackedPdf =
            serde_json::from_str(r#"{"path":"a","url":"b","title":"c"}"#).unwrap();
        assert_eq!(entry.ocr, OcrStatus::Pending);
    }

    #[test]
    fn test_tracker_transitions_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloaded_capone.json");

        let mut tracker = Tracker::load(&path);
        assert!(tracker.is_empty());
        tracker.record(Path::new("a.pdf"), "https://vault.fbi.gov/a", "A").unwrap();
        tracker.record(Path::new("b.pdf"), "https://vault.fbi.gov/b", "B").unwrap();
        tracker.set_status(0, OcrStatus::Complete).unwrap();
        tracker.set_status(1, OcrStatus::Failed).unwrap();

        let reloaded = Tracker::load(&path);
        assert!(reloaded.contains_url("https://vault.fbi.gov/b"));
        assert!(!reloaded.contains_url("https://vault.fbi.gov/c"));
        assert_eq!(
            reloaded.counts(),
            OcrCounts { total: 2, complete: 1, pending: 0, failed: 1 }
        );
        assert_eq!(reloaded.incomplete().len(), 1);
        assert!(!reloaded.counts().all_complete());
    }

    #[test]
    fn test_corrupt_tracking_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloaded_x.json");
        std::fs::write(&path, "[{not json").unwrap();
        assert!(Tracker::load(&path).is_empty());
    }

    #[test]
    fn test_results_store_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fbi_vault_x.json");
        let mut store = ResultsStore::load(&path);
        store
            .push(VaultDocument {
                date: "2024-05-01".into(),
                title: "T".into(),
                body: "B".into(),
                url: "U".into(),
                pdf_path: "P".into(),
            })
            .unwrap();
        assert_eq!(ResultsStore::load(&path).documents().len(), 1);
    }
}
