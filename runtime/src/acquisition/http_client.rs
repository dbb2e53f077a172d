//! HTTP client with browser-like headers, a cookie store and bounded retries.
//!
//! All requests go through one [`reqwest::Client`] so cookies set by a
//! site's home page are replayed on later requests (the FBI Vault refuses
//! direct PDF downloads without them). A shared [`RateLimiter`] spaces
//! requests out, and transient failures (transport errors, 429, 5xx) are
//! retried with a linear back-off.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{FetchError, FetchedPage, PageSource, RateLimiter};
use crate::config::Config;

/// Retry settings for one logical request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Sleep after attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// A buffered text response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Result of streaming a response body to disk.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub bytes: u64,
    pub content_type: Option<String>,
}

/// Shared HTTP client used by every job.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryPolicy,
    limiter: Option<Arc<RateLimiter>>,
}

impl HttpClient {
    /// Build a client from the runtime configuration.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| FetchError::Transport {
                url: String::new(),
                source,
            })?;

        Ok(Self {
            client,
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                backoff: config.retry_backoff,
            },
            limiter: Some(Arc::new(RateLimiter::sequential(config.min_request_delay))),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the rate limiter (`None` disables pacing).
    pub fn with_rate_limiter(mut self, limiter: Option<Arc<RateLimiter>>) -> Self {
        self.limiter = limiter;
        self
    }

    /// GET a page as text.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.retrying(url, || async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|source| transport(url, source))?;
            read_text(url, resp).await
        })
        .await
    }

    /// GET with query parameters, decoding the body as JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let resp = self
            .retrying(url, || async {
                let resp = self
                    .client
                    .get(url)
                    .header(ACCEPT, "application/json")
                    .query(query)
                    .send()
                    .await
                    .map_err(|source| transport(url, source))?;
                read_text(url, resp).await
            })
            .await?;
        serde_json::from_str(&resp.body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// POST an urlencoded form and return the response page.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> Result<HttpResponse, FetchError> {
        self.retrying(url, || async {
            let resp = self
                .client
                .post(url)
                .header(REFERER, url)
                .form(form)
                .send()
                .await
                .map_err(|source| transport(url, source))?;
            read_text(url, resp).await
        })
        .await
    }

    /// Stream `url` into `path`.
    ///
    /// `accept` is consulted with the response content type before anything
    /// is written; a rejected type yields [`FetchError::UnexpectedContent`].
    /// No retries: callers that download try their own URL variations.
    pub async fn download_to<F>(
        &self,
        url: &str,
        path: &Path,
        referer: Option<&str>,
        accept: F,
    ) -> Result<DownloadOutcome, FetchError>
    where
        F: Fn(Option<&str>) -> bool,
    {
        let _guard = self.pace().await;

        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }
        let mut resp = request
            .send()
            .await
            .map_err(|source| transport(url, source))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = header_content_type(resp.headers());
        if !accept(content_type.as_deref()) {
            return Err(FetchError::UnexpectedContent {
                url: url.to_string(),
                content_type,
            });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(path, source))?;
        }
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|source| io_error(path, source))?;

        let mut bytes = 0u64;
        while let Some(chunk) = resp.chunk().await.map_err(|source| transport(url, source))? {
            file.write_all(&chunk)
                .await
                .map_err(|source| io_error(path, source))?;
            bytes += chunk.len() as u64;
        }
        file.flush().await.map_err(|source| io_error(path, source))?;

        debug!(url, bytes, "download complete");
        Ok(DownloadOutcome {
            path: path.to_path_buf(),
            bytes,
            content_type,
        })
    }

    async fn pace(&self) -> Option<super::rate_limiter::RateLimitGuard> {
        match &self.limiter {
            Some(limiter) => Some(limiter.acquire().await),
            None => None,
        }
    }

    async fn retrying<F, Fut>(&self, url: &str, op: F) -> Result<HttpResponse, FetchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<HttpResponse, FetchError>>,
    {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = {
                let _guard = self.pace().await;
                op().await
            };
            match result {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(url, attempt, error = %e, "request failed, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl PageSource for HttpClient {
    async fn fetch_html(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let resp = self.get(url).await?;
        Ok(FetchedPage {
            url: url.to_string(),
            final_url: resp.url,
            html: resp.body,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

async fn read_text(url: &str, resp: reqwest::Response) -> Result<HttpResponse, FetchError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let final_url = resp.url().to_string();
    let content_type = header_content_type(resp.headers());
    let body = resp
        .text()
        .await
        .map_err(|source| transport(url, source))?;
    Ok(HttpResponse {
        url: final_url,
        status: status.as_u16(),
        content_type,
        body,
    })
}

fn header_content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
}

/// Query strings can carry API keys, so the request URL is stripped from the
/// underlying error and only the bare endpoint is reported.
fn transport(url: &str, source: reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        source: source.without_url(),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}
