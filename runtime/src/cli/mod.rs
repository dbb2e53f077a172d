//! CLI subcommand implementations for the `harvest` binary.

pub mod cia_cmd;
pub mod doctor;
pub mod fbi_cmd;
pub mod fred_cmd;
pub mod mail_cmd;
pub mod output;
pub mod progress;
pub mod state_cmd;

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::warn;

use crate::acquisition::{BrowserSource, HttpClient, PageSource};
use crate::audit::{RunJournal, StageTimer};
use crate::config::Config;

/// Time the browser waits after navigation before reading the DOM.
const BROWSER_SETTLE: Duration = Duration::from_secs(2);

/// Plain HTTP unless `--browser` (or `HARVEST_BROWSER`) asks for Chromium.
///
/// A requested browser that cannot start is an error, not a fallback.
pub async fn page_source(config: &Config) -> Result<Box<dyn PageSource>> {
    if config.use_browser {
        let browser = BrowserSource::launch(None, BROWSER_SETTLE)
            .await
            .context("--browser was requested but Chromium could not be started")?;
        return Ok(Box::new(browser));
    }
    Ok(Box::new(http_client(config)?))
}

pub fn http_client(config: &Config) -> Result<HttpClient> {
    HttpClient::new(config).context("failed to build HTTP client")
}

/// Append a finished stage to the run journal. Journal problems never fail
/// the job.
pub fn record_stage(config: &Config, timer: &StageTimer, target: Option<&str>, status: &str, items: Option<u64>) {
    let result = RunJournal::open(&config.journal_path())
        .and_then(|mut journal| journal.record(timer, target, status, items));
    if let Err(e) = result {
        warn!(error = %format!("{e:#}"), "could not write run journal");
    }
}

/// Run `body` as a journaled stage.
pub async fn journaled<T, F>(config: &Config, job: &str, stage: &str, target: Option<&str>, body: F) -> Result<T>
where
    F: std::future::Future<Output = Result<(T, Option<u64>)>>,
{
    let timer = StageTimer::start(job, stage);
    match body.await {
        Ok((value, items)) => {
            record_stage(config, &timer, target, "ok", items);
            Ok(value)
        }
        Err(e) => {
            record_stage(config, &timer, target, "failed", None);
            Err(e)
        }
    }
}
