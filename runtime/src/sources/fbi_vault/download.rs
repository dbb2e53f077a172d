//! PDF downloads from the Vault.
//!
//! The Vault serves a document's PDF behind a handful of URL shapes and
//! refuses requests without the cookies its home page sets, so a download
//! primes the cookie store once and then walks [`url_variations`].

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use super::parse::BASE_URL;
use crate::acquisition::HttpClient;
use crate::storage;

const INVALID_PATH_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const AT_DOWNLOAD: &str = "/at_download/file";

/// Filename for a downloaded PDF: `<safe_title>_<YYYYmmdd_HHMMSS>.pdf`.
pub fn pdf_filename(title: &str, now: &DateTime<Local>) -> String {
    let ts = storage::file_timestamp(now);
    let mut base = storage::safe_title(title);
    if base.is_empty() {
        base = format!("document_{ts}");
    }
    let name: String = format!("{base}_{ts}.pdf")
        .chars()
        .map(|c| if INVALID_PATH_CHARS.contains(&c) { '_' } else { c })
        .collect();
    storage::truncate_filename(&name, 200, 195, "")
}

/// Candidate download URLs, most likely first, without duplicates.
pub fn url_variations(url: &str) -> Vec<String> {
    let candidates = [
        url.to_string(),
        url.replace(AT_DOWNLOAD, ""),
        url.replace(AT_DOWNLOAD, ".pdf"),
        url.replace("https://vault.fbi.gov/", "https://vault.fbi.gov/download/"),
    ];
    let mut out: Vec<String> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if !out.contains(&c) {
            out.push(c);
        }
    }
    out
}

/// Content types the Vault uses for PDFs.
pub fn accepts_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        let ct = ct.to_ascii_lowercase();
        ct.contains("pdf") || ct.contains("octet-stream") || ct.contains("application")
    })
}

/// The PDF storage directory.
#[derive(Debug, Clone)]
pub struct PdfStore {
    dir: PathBuf,
}

impl PdfStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scratch directory for partial downloads.
    pub fn temp_dir(&self) -> PathBuf {
        self.dir.join(".tmp")
    }

    pub fn ensure(&self) -> Result<()> {
        storage::ensure_dir(&self.dir)?;
        storage::ensure_dir(&self.temp_dir())
    }

    /// A stored file for `filename`: the exact name, or any PDF whose name
    /// starts with the same base (an earlier run's timestamp).
    pub fn existing_for(&self, filename: &str) -> Option<PathBuf> {
        let exact = self.dir.join(filename);
        if exact.exists() {
            return Some(exact);
        }
        let base = base_name(filename);
        if base.is_empty() {
            return None;
        }
        self.pdfs().into_iter().find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(base) && n.ends_with(".pdf"))
        })
    }

    /// A stored PDF with exactly `size` bytes.
    pub fn same_size(&self, size: u64) -> Option<PathBuf> {
        self.pdfs()
            .into_iter()
            .find(|p| storage::file_size(p) == size)
    }

    fn pdfs(&self) -> Vec<PathBuf> {
        storage::list_dir(&self.dir, |p| p.is_file() && storage::has_extension(p, "pdf"))
            .unwrap_or_default()
    }
}

/// Filename minus the `_<timestamp>.pdf` suffix.
fn base_name(filename: &str) -> &str {
    let stem = filename.strip_suffix(".pdf").unwrap_or(filename);
    // Strip `_YYYYmmdd_HHMMSS`.
    let mut parts = stem.rsplitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(time), Some(date), Some(base))
            if time.len() == 6
                && date.len() == 8
                && time.chars().all(|c| c.is_ascii_digit())
                && date.chars().all(|c| c.is_ascii_digit()) =>
        {
            base
        }
        _ => stem,
    }
}

/// How a download request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadResult {
    /// A new file was written.
    Saved(PathBuf),
    /// A file for this document was already stored.
    Existing(PathBuf),
    /// The response matched a stored file byte-for-byte in size.
    Duplicate(PathBuf),
}

impl DownloadResult {
    pub fn path(&self) -> &Path {
        match self {
            DownloadResult::Saved(p) | DownloadResult::Existing(p) | DownloadResult::Duplicate(p) => p,
        }
    }
}

/// Downloads PDFs into a [`PdfStore`].
pub struct VaultDownloader {
    client: HttpClient,
    store: PdfStore,
    home_url: String,
}

impl VaultDownloader {
    pub fn new(client: HttpClient, store: PdfStore) -> Self {
        Self {
            client,
            store,
            home_url: BASE_URL.to_string(),
        }
    }

    /// Page requested first so the cookie store holds the site's cookies.
    pub fn with_home_url(mut self, url: impl Into<String>) -> Self {
        self.home_url = url.into();
        self
    }

    pub fn store(&self) -> &PdfStore {
        &self.store
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Download `url` into the store as `filename`.
    pub async fn download(
        &self,
        url: &str,
        filename: &str,
        referer: Option<&str>,
    ) -> Result<DownloadResult> {
        if let Some(existing) = self.store.existing_for(filename) {
            debug!(path = %existing.display(), "PDF already stored");
            return Ok(DownloadResult::Existing(existing));
        }
        self.store.ensure()?;

        if let Err(e) = self.client.get(&self.home_url).await {
            debug!(error = %e, "cookie priming request failed");
        }

        let partial = self.store.temp_dir().join(format!("{filename}.part"));
        let mut last_error = None;
        for candidate in url_variations(url) {
            match self
                .client
                .download_to(&candidate, &partial, referer, accepts_content_type)
                .await
            {
                Ok(outcome) if outcome.bytes == 0 => {
                    warn!(url = %candidate, "empty response body");
                    let _ = std::fs::remove_file(&partial);
                }
                Ok(outcome) => {
                    if let Some(dup) = self.store.same_size(outcome.bytes) {
                        info!(path = %dup.display(), "identical-size PDF already stored, skipping");
                        let _ = std::fs::remove_file(&partial);
                        return Ok(DownloadResult::Duplicate(dup));
                    }
                    let dest = self.store.dir().join(filename);
                    storage::move_file(&partial, &dest)
                        .with_context(|| format!("failed to store {}", dest.display()))?;
                    info!(path = %dest.display(), bytes = outcome.bytes, "downloaded PDF");
                    return Ok(DownloadResult::Saved(dest));
                }
                Err(e) => {
                    debug!(url = %candidate, error = %e, "download variation failed");
                    let _ = std::fs::remove_file(&partial);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => bail!("all download URLs failed for {url}: {e}"),
            None => bail!("no usable response for {url}"),
        }
    }
}

/// Remove files in `dir` older than `max_age`; returns how many went.
pub fn cleanup_temp_dir(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > max_age);
        if path.is_file() && stale && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(removed, dir = %dir.display(), "cleaned up stale temp files");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::RetryPolicy;
    use crate::config::Config;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 13, 4, 5).unwrap()
    }

    #[test]
    fn test_pdf_filename() {
        assert_eq!(pdf_filename("Al Capone: Part 1", &now()), "Al Capone Part 1_20240501_130405.pdf");
        assert_eq!(pdf_filename("???", &now()), "document_20240501_130405_20240501_130405.pdf");
        let long = pdf_filename(&"x".repeat(300), &now());
        assert_eq!(long.chars().count(), 199);
        assert!(long.ends_with(".pdf"));
    }

    #[test]
    fn test_url_variations() {
        let v = url_variations("https://vault.fbi.gov/capone/part-01/at_download/file");
        assert_eq!(
            v,
            vec![
                "https://vault.fbi.gov/capone/part-01/at_download/file",
                "https://vault.fbi.gov/capone/part-01",
                "https://vault.fbi.gov/capone/part-01.pdf",
                "https://vault.fbi.gov/download/capone/part-01/at_download/file",
            ]
        );
        assert_eq!(url_variations("https://example.com/a.pdf").len(), 1);
    }

    #[test]
    fn test_accepts_content_type() {
        assert!(accepts_content_type(Some("application/pdf")));
        assert!(accepts_content_type(Some("binary/octet-stream")));
        assert!(!accepts_content_type(Some("text/html; charset=utf-8")));
        assert!(!accepts_content_type(None));
    }

    #[test]
    fn test_existing_for_matches_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = PdfStore::new(dir.path());
        std::fs::write(dir.path().join("Capone Part 1_20230101_000000.pdf"), b"%PDF").unwrap();

        let found = store.existing_for("Capone Part 1_20240501_130405.pdf").unwrap();
        assert!(found.ends_with("Capone Part 1_20230101_000000.pdf"));
        assert!(store.existing_for("Other_20240501_130405.pdf").is_none());
        assert!(store.same_size(4).is_some());
        assert!(store.same_size(5).is_none());
    }

    #[test]
    fn test_cleanup_temp_dir_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fresh.part"), b"x").unwrap();
        assert_eq!(cleanup_temp_dir(dir.path(), Duration::from_secs(600)), 0);
        assert_eq!(cleanup_temp_dir(dir.path(), Duration::ZERO), 1);
        assert_eq!(cleanup_temp_dir(&dir.path().join("missing"), Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn test_download_falls_through_variations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc/at_download/file"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html").set_body_string("<html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.4 fake".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = PdfStore::new(dir.path().join("pdfs"));
        let client = HttpClient::new(&Config::from_env())
            .unwrap()
            .with_retry(RetryPolicy::none())
            .with_rate_limiter(None);
        let downloader = VaultDownloader::new(client, store).with_home_url(server.uri());

        let url = format!("{}/doc/at_download/file", server.uri());
        let result = downloader
            .download(&url, "Doc_20240501_130405.pdf", None)
            .await
            .unwrap();
        assert!(matches!(result, DownloadResult::Saved(_)));
        assert_eq!(std::fs::read(result.path()).unwrap(), b"%PDF-1.4 fake");

        let again = downloader
            .download(&url, "Doc_20240502_000000.pdf", None)
            .await
            .unwrap();
        assert!(matches!(again, DownloadResult::Existing(_)));
    }
}
