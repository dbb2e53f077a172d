//! CIA reading room harvester for the `cia rdp96` document collection.
//!
//! Three layers on disk:
//! - `layer_0/page_<n>.html`: search result pages
//! - `page_urls/layer_1_urls.txt`: unique document URLs found in layer 0
//! - `layer_1/<doc_id>.html`: document pages
//!
//! and the index `cia_rdp96.json` built from layer 1, keyed by date then
//! document id.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

use super::ScrapeSummary;
use crate::acquisition::{links, pacing, PageSource};
use crate::storage;

pub const SEARCH_URL: &str = "https://www.cia.gov/readingroom/search/site/cia%20rdp96";
/// Page the original crawl resumed from.
pub const DEFAULT_START_PAGE: u32 = 4092;
/// Pause after every page load.
pub const PAGE_PAUSE: Duration = Duration::from_secs(2);

static DOC_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"a href="(https://www\.cia\.gov/readingroom/document/cia-rdp96-.*?)""#).unwrap()
});
static CREATION_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)Document Creation Date:[^>]*>.*?content="([^"]+?)""#).unwrap()
});
static RELEASE_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)Document Release Date:[^>]*>.*?content="([^"]+?)""#).unwrap()
});
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<title>(.*?)</title>").unwrap());
static BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Body:[^>]*>(.*?)</div>").unwrap());
static BODY_FALLBACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<div class="field-name-body"[^>]*>.*?<div class="field-item[^>]*>(.*?)</div>"#)
        .unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Directory layout under the output root.
#[derive(Debug, Clone)]
pub struct CiaLayout {
    root: PathBuf,
}

impl CiaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn layer0(&self) -> PathBuf {
        self.root.join("layer_0")
    }

    pub fn layer1(&self) -> PathBuf {
        self.root.join("layer_1")
    }

    pub fn urls_file(&self) -> PathBuf {
        self.root.join("page_urls").join("layer_1_urls.txt")
    }

    pub fn index_file(&self) -> PathBuf {
        self.root.join("cia_rdp96.json")
    }

    pub fn results_file(&self) -> PathBuf {
        self.root.join("results.json")
    }

    /// Create all layer directories.
    pub fn ensure(&self) -> Result<()> {
        storage::ensure_dir(&self.layer0())?;
        storage::ensure_dir(&self.layer1())?;
        storage::ensure_dir(&self.root.join("page_urls"))
    }
}

/// One document in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiaDocument {
    pub title: String,
    pub body: String,
}

/// `{ date: { doc_id: document } }`; undated documents live under `""`.
pub type CiaIndex = BTreeMap<String, BTreeMap<String, CiaDocument>>;

/// Fields pulled out of a document page.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    /// Earliest valid creation/release date, `YYYY-MM-DD`.
    pub date: Option<String>,
    pub title: String,
    pub body: String,
}

/// A search match written to `results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub date: String,
    pub title: String,
    pub content: String,
}

pub fn search_page_url(page: u32) -> String {
    format!("{SEARCH_URL}?page={page}")
}

/// Fetch search result pages from `start_page` upward into layer 0.
///
/// Stops at the first failed fetch, at a page without document links, or
/// after `max_pages` pages.
pub async fn scrape_search_pages(
    source: &dyn PageSource,
    layout: &CiaLayout,
    start_page: u32,
    max_pages: Option<u32>,
    pause: Duration,
) -> Result<ScrapeSummary> {
    layout.ensure()?;
    let mut summary = ScrapeSummary::default();
    let mut page = start_page;

    loop {
        if max_pages.is_some_and(|max| page - start_page >= max) {
            break;
        }
        let url = search_page_url(page);
        let fetched = match source.fetch_html(&url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(page, error = %e, "search page failed, stopping");
                summary.failed += 1;
                break;
            }
        };

        let path = layout.layer0().join(format!("page_{page}.html"));
        std::fs::write(&path, &fetched.html)
            .with_context(|| format!("failed to write {}", path.display()))?;
        summary.saved += 1;
        info!(page, "saved search page");

        pacing::pause(pause).await;
        if document_urls_in(&fetched.html).is_empty() {
            info!(page, "no document links on page, stopping");
            break;
        }
        page += 1;
    }
    Ok(summary)
}

/// Document URLs linked from one search page, in page order.
pub fn document_urls_in(html: &str) -> Vec<String> {
    DOC_LINK_RE
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Collect unique document URLs from every layer 0 page and write the URL
/// list. Returns the sorted URLs.
pub fn extract_document_urls(layout: &CiaLayout) -> Result<Vec<String>> {
    let pages = storage::list_dir(&layout.layer0(), |p| storage::has_extension(p, "html"))?;
    let mut urls = BTreeSet::new();
    for page in &pages {
        let html = std::fs::read_to_string(page)
            .with_context(|| format!("failed to read {}", page.display()))?;
        urls.extend(document_urls_in(&html));
    }
    let urls: Vec<String> = urls.into_iter().collect();

    let list = layout.urls_file();
    if let Some(parent) = list.parent() {
        storage::ensure_dir(parent)?;
    }
    let mut contents = urls.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    std::fs::write(&list, contents).with_context(|| format!("failed to write {}", list.display()))?;

    info!(count = urls.len(), pages = pages.len(), "extracted unique document URLs");
    Ok(urls)
}

/// Read the URL list written by [`extract_document_urls`].
pub fn read_url_list(layout: &CiaLayout) -> Result<Vec<String>> {
    let path = layout.urls_file();
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Ids of the documents already saved in layer 1.
pub fn downloaded_ids(layout: &CiaLayout) -> Result<BTreeSet<String>> {
    let dir = layout.layer1();
    if !dir.exists() {
        return Ok(BTreeSet::new());
    }
    Ok(storage::list_dir(&dir, |p| storage::has_extension(p, "html"))?
        .iter()
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
        .collect())
}

/// Fetch every document page not yet in layer 1.
///
/// `on_progress` is called after each attempted document.
pub async fn scrape_document_pages<F>(
    source: &dyn PageSource,
    layout: &CiaLayout,
    urls: &[String],
    pause: Duration,
    mut on_progress: F,
) -> Result<ScrapeSummary>
where
    F: FnMut(usize, usize),
{
    layout.ensure()?;
    let downloaded = downloaded_ids(layout)?;
    let pending: Vec<(&String, String)> = urls
        .iter()
        .filter_map(|url| links::last_path_segment(url).map(|id| (url, id)))
        .filter(|(_, id)| !downloaded.contains(id))
        .collect();

    let mut summary = ScrapeSummary {
        skipped: urls.len() - pending.len(),
        ..Default::default()
    };
    info!(
        already = downloaded.len(),
        new = pending.len(),
        skipped = summary.skipped,
        "scraping document pages"
    );

    let total = pending.len();
    for (i, (url, doc_id)) in pending.into_iter().enumerate() {
        match source.fetch_html(url).await {
            Ok(fetched) => {
                let path = layout.layer1().join(format!("{doc_id}.html"));
                match std::fs::write(&path, &fetched.html) {
                    Ok(()) => summary.saved += 1,
                    Err(e) => {
                        warn!(doc_id, error = %e, "failed to save document page");
                        summary.failed += 1;
                    }
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "failed to fetch document page");
                summary.failed += 1;
            }
        }
        on_progress(i + 1, total);
        pacing::pause(pause).await;
    }
    Ok(summary)
}

/// Extract the date, title and body of a document page.
pub fn parse_document(html: &str) -> ParsedDocument {
    let mut earliest: Option<NaiveDate> = None;
    for re in [&*CREATION_DATE_RE, &*RELEASE_DATE_RE] {
        let Some(raw) = re.captures(html).and_then(|c| c.get(1)) else {
            continue;
        };
        let date_part = raw.as_str().split('T').next().unwrap_or_default();
        if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
            if earliest.map_or(true, |e| date < e) {
                earliest = Some(date);
            }
        }
    }

    let title = TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let mut body = BODY_RE
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .max_by_key(|s| s.len())
        .unwrap_or_default();
    if body.is_empty() {
        body = BODY_FALLBACK_RE
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or_default();
    }

    ParsedDocument {
        date: earliest.map(|d| d.format("%Y-%m-%d").to_string()),
        title,
        body: clean_html_text(body),
    }
}

/// Strip tags and collapse whitespace.
pub fn clean_html_text(fragment: &str) -> String {
    let without_tags = TAG_RE.replace_all(fragment.trim(), "");
    WS_RE.replace_all(&without_tags, " ").trim().to_string()
}

/// Parse every layer 1 page into the date-keyed index and write it.
pub fn build_index(layout: &CiaLayout) -> Result<CiaIndex> {
    let files = storage::list_dir(&layout.layer1(), |p| storage::has_extension(p, "html"))?;
    let total = files.len();
    info!(total, "processing documents");

    let mut index = CiaIndex::new();
    for (i, path) in files.iter().enumerate() {
        let idx = i + 1;
        if idx % 100 == 0 || idx == total {
            info!("processed {idx}/{total} documents");
        }
        let Some(doc_id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let html = match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable document page");
                continue;
            }
        };

        let parsed = parse_document(&html);
        if parsed.date.is_none() {
            warn!(doc_id, "no date found");
        }
        index
            .entry(parsed.date.unwrap_or_default())
            .or_default()
            .insert(
                doc_id.to_string(),
                CiaDocument {
                    title: parsed.title,
                    body: parsed.body,
                },
            );
    }

    storage::write_json_pretty(&layout.index_file(), &index)?;
    info!(dates = index.len(), "wrote {}", layout.index_file().display());
    Ok(index)
}

/// Case-insensitive regex search over each document's `{title, body}`.
pub fn search_index(index: &CiaIndex, pattern: &str) -> Result<Vec<SearchHit>> {
    let re = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid search pattern: {pattern}"))?;

    let mut hits = Vec::new();
    for (date, docs) in index {
        for (doc_id, doc) in docs {
            let content = serde_json::to_string(doc)?;
            if re.is_match(&content) {
                hits.push(SearchHit {
                    date: date.clone(),
                    title: doc_id.clone(),
                    content,
                });
            }
        }
    }
    Ok(hits)
}

/// Load the index, search it and write the hits to `out`.
pub fn search_index_file(index_path: &Path, pattern: &str, out: &Path) -> Result<Vec<SearchHit>> {
    let index: CiaIndex = storage::read_json(index_path)?;
    let hits = search_index(&index, pattern)?;
    storage::write_json_pretty(out, &hits)?;
    Ok(hits)
}
