//! FBI Vault harvester: search a term, download every result's PDF, then
//! extract text from the PDFs into a results file.
//!
//! Progress lives in the tracking file `downloaded_<term>.json`, so an
//! interrupted run picks up where it stopped.

pub mod download;
pub mod ocr_phase;
pub mod parse;
pub mod tracker;

use anyhow::{bail, Context, Result};
use chrono::Local;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use download::{cleanup_temp_dir, pdf_filename, DownloadResult, PdfStore, VaultDownloader};
pub use ocr_phase::{run_ocr_phase, OcrPhaseOptions, OcrPhaseReport};
pub use parse::ResultLink;
pub use tracker::{OcrCounts, OcrStatus, ResultsStore, TrackedPdf, Tracker, VaultDocument};

use super::ScrapeSummary;
use crate::acquisition::{pacing, PageSource};
use crate::pdf::ocr::OcrEngine;
use crate::storage;

/// Partial downloads older than this are removed at startup.
pub const TEMP_MAX_AGE: Duration = Duration::from_secs(10 * 60);
/// Upper bound on result pages followed for one term.
const MAX_RESULT_PAGES: usize = 500;

/// Where a term's files live.
#[derive(Debug, Clone)]
pub struct VaultLayout {
    root: PathBuf,
    pdf_dir: PathBuf,
}

impl VaultLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            pdf_dir: root.join("fbi_vault_pdfs"),
            root,
        }
    }

    pub fn with_pdf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pdf_dir = dir.into();
        self
    }

    pub fn pdf_dir(&self) -> &Path {
        &self.pdf_dir
    }

    pub fn tracking_file(&self, term: &str) -> PathBuf {
        self.root.join(format!("downloaded_{}.json", file_term(term)))
    }

    pub fn results_file(&self, term: &str) -> PathBuf {
        self.root.join(format!("fbi_vault_{}.json", file_term(term)))
    }
}

fn file_term(term: &str) -> String {
    let safe = storage::safe_title(term.trim());
    if safe.is_empty() {
        "search".to_string()
    } else {
        safe
    }
}

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct VaultOptions {
    pub term: String,
    /// Stop after this many new downloads.
    pub max_documents: Option<usize>,
    pub download_attempts: u32,
    pub verify_attempts: u32,
    /// Pause between document pages.
    pub page_pause: Duration,
    pub ocr: OcrPhaseOptions,
}

impl VaultOptions {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            max_documents: None,
            download_attempts: 3,
            verify_attempts: 3,
            page_pause: Duration::from_secs(2),
            ocr: OcrPhaseOptions::default(),
        }
    }
}

/// Outcome of the download phase plus verification.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub summary: ScrapeSummary,
    pub available: Option<usize>,
    /// Result links still not downloaded after verification.
    pub missing: usize,
}

/// Tracking and results state for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct VaultStatus {
    pub term: String,
    pub tracking_file: PathBuf,
    pub counts: OcrCounts,
    pub results: usize,
}

/// One term's harvest.
pub struct VaultJob<'a> {
    source: &'a dyn PageSource,
    downloader: VaultDownloader,
    layout: VaultLayout,
    options: VaultOptions,
    ocr: Option<OcrEngine>,
}

impl<'a> VaultJob<'a> {
    pub fn new(
        source: &'a dyn PageSource,
        downloader: VaultDownloader,
        layout: VaultLayout,
        options: VaultOptions,
    ) -> Self {
        Self {
            source,
            downloader,
            layout,
            options,
            ocr: None,
        }
    }

    pub fn with_ocr(mut self, engine: Option<OcrEngine>) -> Self {
        self.ocr = engine;
        self
    }

    pub fn tracker(&self) -> Tracker {
        Tracker::load(&self.layout.tracking_file(&self.options.term))
    }

    /// Every result link across all result pages, deduplicated by URL.
    pub async fn collect_links(&self) -> Result<(Vec<ResultLink>, Option<usize>)> {
        let mut links = Vec::new();
        let mut seen = HashSet::new();
        let mut pages_seen = HashSet::new();
        let mut available = None;
        let mut next = Some(parse::search_url(&self.options.term, 0));

        while let Some(url) = next.take() {
            if !pages_seen.insert(url.clone()) || pages_seen.len() > MAX_RESULT_PAGES {
                break;
            }
            let page = self
                .source
                .fetch_html(&url)
                .await
                .with_context(|| format!("failed to load search results {url}"))?;
            if available.is_none() {
                available = parse::parse_result_count(&page.html);
            }
            for link in parse::parse_result_links(&page.html, &page.final_url) {
                if seen.insert(link.url.clone()) {
                    links.push(link);
                }
            }
            next = parse::parse_next_page(&page.html, &page.final_url);
        }
        debug!(links = links.len(), ?available, "collected result links");
        Ok((links, available))
    }

    /// Download the PDF behind one result, recording it in `tracker`.
    async fn process_document(&self, link: &ResultLink, tracker: &mut Tracker) -> Result<DownloadResult> {
        let page = self
            .source
            .fetch_html(&link.url)
            .await
            .with_context(|| format!("failed to load document page {}", link.url))?;
        let title = parse::parse_document_title(&page.html).unwrap_or_else(|| link.title.clone());
        let Some(pdf_url) = parse::extract_pdf_url(&page.html, &page.final_url) else {
            bail!("no PDF link on {}", link.url);
        };

        let filename = pdf_filename(&title, &Local::now());
        let result = self
            .downloader
            .download(&pdf_url, &filename, Some(&link.url))
            .await?;
        tracker.record(result.path(), &link.url, &title)?;
        Ok(result)
    }

    async fn download_links(
        &self,
        links: &[ResultLink],
        tracker: &mut Tracker,
        summary: &mut ScrapeSummary,
    ) -> Result<()> {
        for link in links {
            if self.options.max_documents.is_some_and(|max| summary.saved >= max) {
                info!(max = summary.saved, "reached document limit");
                break;
            }
            if tracker.contains_url(&link.url) {
                summary.skipped += 1;
                continue;
            }

            let mut done = false;
            for attempt in 1..=self.options.download_attempts.max(1) {
                match self.process_document(link, tracker).await {
                    Ok(DownloadResult::Saved(path)) => {
                        info!(title = %link.title, path = %path.display(), "saved");
                        summary.saved += 1;
                        done = true;
                        break;
                    }
                    Ok(_) => {
                        summary.skipped += 1;
                        done = true;
                        break;
                    }
                    Err(e) => {
                        warn!(url = %link.url, attempt, error = %format!("{e:#}"), "document download failed");
                        pacing::pause(self.options.page_pause).await;
                    }
                }
            }
            if !done {
                summary.failed += 1;
            }
            pacing::pause(self.options.page_pause).await;
        }
        Ok(())
    }

    /// Download every result not yet tracked, then verify against a fresh
    /// listing and retry whatever is still missing.
    pub async fn download_phase(&self) -> Result<DownloadReport> {
        let store = self.downloader.store();
        store.ensure()?;
        cleanup_temp_dir(&store.temp_dir(), TEMP_MAX_AGE);

        let mut tracker = self.tracker();
        let mut report = DownloadReport::default();
        let (links, available) = self.collect_links().await?;
        report.available = available;
        info!(term = %self.options.term, results = links.len(), ?available, "search complete");
        self.download_links(&links, &mut tracker, &mut report.summary).await?;

        if self.options.max_documents.is_some() {
            return Ok(report);
        }
        for attempt in 1..=self.options.verify_attempts {
            let (links, _) = self.collect_links().await?;
            let missing: Vec<ResultLink> = links
                .into_iter()
                .filter(|l| !tracker.contains_url(&l.url))
                .collect();
            report.missing = missing.len();
            if missing.is_empty() {
                info!(tracked = tracker.len(), "all results downloaded");
                break;
            }
            warn!(attempt, missing = missing.len(), "downloading missing documents");
            let mut retry = ScrapeSummary::default();
            self.download_links(&missing, &mut tracker, &mut retry).await?;
            report.summary.saved += retry.saved;
            report.summary.failed = retry.failed;
            report.missing = retry.failed;
        }
        Ok(report)
    }

    /// Extract text from every tracked PDF not yet complete.
    pub async fn ocr_phase(&self) -> Result<OcrPhaseReport> {
        let mut tracker = self.tracker();
        let mut results = ResultsStore::load(&self.layout.results_file(&self.options.term));
        run_ocr_phase(
            &mut tracker,
            &mut results,
            Some(self.source),
            self.ocr.as_ref(),
            &self.options.ocr,
        )
        .await
    }

    /// Download phase, then OCR phase.
    pub async fn run(&self) -> Result<(DownloadReport, OcrPhaseReport)> {
        let downloads = self.download_phase().await?;
        let ocr = self.ocr_phase().await?;
        Ok((downloads, ocr))
    }
}

/// Tracking and results summary for `term`.
pub fn status(layout: &VaultLayout, term: &str) -> VaultStatus {
    let tracking_file = layout.tracking_file(term);
    let counts = Tracker::load(&tracking_file).counts();
    let results = ResultsStore::load(&layout.results_file(term)).documents().len();
    VaultStatus {
        term: term.to_string(),
        tracking_file,
        counts,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{FetchError, FetchedPage, HttpClient, RetryPolicy};
    use crate::config::Config;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakeVault {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl PageSource for FakeVault {
        async fn fetch_html(&self, url: &str) -> Result<FetchedPage, FetchError> {
            match self.pages.get(url) {
                Some(html) => Ok(FetchedPage {
                    url: url.to_string(),
                    final_url: url.to_string(),
                    html: html.clone(),
                }),
                None => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    #[test]
    fn test_layout_file_names() {
        let layout = VaultLayout::new("/out");
        assert_eq!(
            layout.tracking_file("al capone"),
            PathBuf::from("/out/downloaded_al capone.json")
        );
        assert_eq!(
            layout.results_file("al capone?"),
            PathBuf::from("/out/fbi_vault_al capone.json")
        );
        assert_eq!(
            layout.tracking_file("../x"),
            PathBuf::from("/out/downloaded_x.json")
        );
        assert_eq!(layout.pdf_dir(), Path::new("/out/fbi_vault_pdfs"));
    }

    #[tokio::test]
    async fn test_collect_links_follows_pagination() {
        let first = parse::search_url("capone", 0);
        let mut pages = HashMap::new();
        pages.insert(
            first.clone(),
            r#"<span class="results-count">3 items</span>
               <dt><a href="/a">A</a></dt><dt><a href="/b">B</a></dt>
               <li class="next"><a href="https://vault.fbi.gov/search?page=2">next</a></li>"#
                .to_string(),
        );
        pages.insert(
            "https://vault.fbi.gov/search?page=2".to_string(),
            r#"<dt><a href="/b">B</a></dt><dt><a href="/c">C</a></dt>"#.to_string(),
        );
        let source = FakeVault { pages };

        let dir = tempfile::tempdir().unwrap();
        let client = HttpClient::new(&Config::from_env())
            .unwrap()
            .with_retry(RetryPolicy::none())
            .with_rate_limiter(None);
        let job = VaultJob::new(
            &source,
            VaultDownloader::new(client, PdfStore::new(dir.path())),
            VaultLayout::new(dir.path()),
            VaultOptions::new("capone"),
        );

        let (links, available) = job.collect_links().await.unwrap();
        let urls: Vec<_> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://vault.fbi.gov/a",
                "https://vault.fbi.gov/b",
                "https://vault.fbi.gov/c"
            ]
        );
        assert_eq!(available, Some(3));
    }

    fn test_client() -> HttpClient {
        HttpClient::new(&Config::from_env())
            .unwrap()
            .with_retry(RetryPolicy::none())
            .with_rate_limiter(None)
    }

    /// Four results: `a` and `b` serve PDFs, `c` points at a PDF that always
    /// fails, `d` has no PDF link at all.
    async fn vault_with_pdfs(server: &MockServer) -> FakeVault {
        for (name, body) in [("a", "%PDF-1.4 a"), ("b", "%PDF-1.4 bb")] {
            Mock::given(method("GET"))
                .and(path(format!("/{name}.pdf")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("content-type", "application/pdf")
                        .set_body_bytes(body.as_bytes().to_vec()),
                )
                .mount(server)
                .await;
        }

        let mut pages = HashMap::new();
        pages.insert(
            parse::search_url("capone", 0),
            r#"<dl><dt><a href="/a">A</a></dt><dt><a href="/b">B</a></dt>
               <dt><a href="/c">C</a></dt><dt><a href="/d">D</a></dt></dl>"#
                .to_string(),
        );
        for name in ["a", "b", "c"] {
            pages.insert(
                format!("https://vault.fbi.gov/{name}"),
                format!(
                    r#"<h1>Doc {name}</h1><a href="{}/{name}.pdf">Download</a>"#,
                    server.uri()
                ),
            );
        }
        pages.insert("https://vault.fbi.gov/d".to_string(), "<h1>Doc d</h1>".to_string());
        FakeVault { pages }
    }

    fn options(max_documents: Option<usize>) -> VaultOptions {
        let mut options = VaultOptions::new("capone");
        options.max_documents = max_documents;
        options.verify_attempts = 1;
        options.page_pause = Duration::ZERO;
        options
    }

    #[tokio::test]
    async fn test_download_phase_retries_and_verifies() {
        let server = MockServer::start().await;
        // Three attempts in the first pass, three more during verification.
        Mock::given(method("GET"))
            .and(path("/c.pdf"))
            .respond_with(ResponseTemplate::new(500))
            .expect(6)
            .mount(&server)
            .await;
        let source = vault_with_pdfs(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = VaultDownloader::new(test_client(), PdfStore::new(dir.path().join("pdfs")))
            .with_home_url(server.uri());
        let job = VaultJob::new(&source, downloader, VaultLayout::new(dir.path()), options(None));

        let report = job.download_phase().await.unwrap();
        assert_eq!(report.summary.saved, 2);
        assert_eq!(report.summary.failed, 2);
        assert_eq!(report.missing, 2);

        let tracker = job.tracker();
        assert_eq!(tracker.len(), 2);
        assert!(tracker.contains_url("https://vault.fbi.gov/a"));
        assert!(tracker.contains_url("https://vault.fbi.gov/b"));
        assert!(!tracker.contains_url("https://vault.fbi.gov/d"));
    }

    #[tokio::test]
    async fn test_download_phase_stops_at_document_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/c.pdf"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let source = vault_with_pdfs(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = VaultDownloader::new(test_client(), PdfStore::new(dir.path().join("pdfs")))
            .with_home_url(server.uri());
        let job = VaultJob::new(&source, downloader, VaultLayout::new(dir.path()), options(Some(1)));

        let report = job.download_phase().await.unwrap();
        assert_eq!(report.summary.saved, 1);
        assert_eq!(report.summary.failed, 0);
        assert_eq!(job.tracker().len(), 1);
    }

    #[test]
    fn test_status_of_empty_term() {
        let dir = tempfile::tempdir().unwrap();
        let status = status(&VaultLayout::new(dir.path()), "nothing");
        assert_eq!(status.counts.total, 0);
        assert_eq!(status.results, 0);
    }
}
