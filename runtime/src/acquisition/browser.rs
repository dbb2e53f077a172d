//! Headless Chromium page source for JavaScript-rendered pages.

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{FetchError, FetchedPage, PageSource};
use crate::tools::{self, Tool};

/// One browser process shared by a job; each fetch opens and closes a tab.
pub struct BrowserSource {
    browser: Mutex<Option<Browser>>,
    handler: JoinHandle<()>,
    settle: Duration,
}

impl BrowserSource {
    /// Launch headless Chromium.
    ///
    /// `executable` overrides discovery; otherwise the usual tool lookup
    /// runs. Failing to find or start the browser is an error.
    pub async fn launch(executable: Option<PathBuf>, settle: Duration) -> Result<Self, FetchError> {
        let executable = match executable {
            Some(path) => path,
            None => tools::require(Tool::Chromium)
                .map_err(|e| FetchError::Browser(e.to_string()))?,
        };

        let config = BrowserConfig::builder()
            .chrome_executable(&executable)
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .window_size(1920, 1080)
            .build()
            .map_err(FetchError::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Browser(format!("failed to launch {}: {e}", executable.display())))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    debug!("browser handler event error");
                }
            }
        });

        info!(executable = %executable.display(), "browser launched");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler,
            settle,
        })
    }
}

#[async_trait]
impl PageSource for BrowserSource {
    async fn fetch_html(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| FetchError::Browser("browser already closed".into()))?;

        let page = browser
            .new_page(url)
            .await
            .map_err(|e| FetchError::Browser(format!("{url}: {e}")))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| FetchError::Browser(format!("{url}: {e}")))?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        let html = page
            .content()
            .await
            .map_err(|e| FetchError::Browser(format!("{url}: {e}")))?;
        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());
        if let Err(e) = page.close().await {
            debug!(url, error = %e, "failed to close tab");
        }

        Ok(FetchedPage {
            url: url.to_string(),
            final_url,
            html,
        })
    }

    fn name(&self) -> &'static str {
        "browser"
    }

    async fn shutdown(&self) {
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "browser did not close cleanly");
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
    }
}
