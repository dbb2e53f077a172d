//! Page acquisition: where HTML and files come from.
//!
//! Jobs fetch pages through the [`PageSource`] trait so the same scraping
//! code runs over plain HTTP ([`HttpClient`]) or a headless browser
//! ([`BrowserSource`]) for pages that need JavaScript.

pub mod browser;
pub mod http_client;
pub mod links;
pub mod pacing;
pub mod rate_limiter;

use async_trait::async_trait;
use std::path::PathBuf;

pub use browser::BrowserSource;
pub use http_client::{DownloadOutcome, HttpClient, HttpResponse, RetryPolicy};
pub use rate_limiter::RateLimiter;

/// Errors raised while fetching pages or files.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} served unexpected content type {content_type:?}")]
    UnexpectedContent {
        url: String,
        content_type: Option<String>,
    },
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("browser error: {0}")]
    Browser(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } | FetchError::Browser(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A fetched HTML page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested.
    pub url: String,
    /// URL after redirects, used as the base for relative links.
    pub final_url: String,
    pub html: String,
}

/// Something that can turn a URL into rendered HTML.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<FetchedPage, FetchError>;

    /// Short name for logs ("http", "browser").
    fn name(&self) -> &'static str;

    /// Release any resources held by the source.
    async fn shutdown(&self) {}
}
