//! Runtime configuration resolved from CLI flags, environment, and defaults.
//!
//! There is no configuration file. Every job reads what it needs from a
//! [`Config`] built once in `main`; flags override environment variables,
//! which override the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Browser-like user agent sent with every HTTP request.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Resolved runtime configuration shared by all jobs.
#[derive(Debug, Clone)]
pub struct Config {
    /// State directory for the run journal (`~/.harvest` by default).
    pub home: PathBuf,
    /// Directory relative job paths are resolved against (current directory by default).
    pub work_dir: PathBuf,
    /// Explicit `output/` directory for the scraper jobs (`HARVEST_OUTPUT`).
    pub output: Option<PathBuf>,
    /// FRED API key, if one is configured.
    pub fred_api_key: Option<String>,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Attempts per HTTP request before giving up.
    pub max_attempts: u32,
    /// Base back-off between attempts; multiplied by the attempt number.
    pub retry_backoff: Duration,
    /// Minimum delay between any two HTTP requests.
    pub min_request_delay: Duration,
    /// Fetch pages with headless Chromium instead of plain HTTP.
    pub use_browser: bool,
}

impl Config {
    /// Build a configuration from environment variables and defaults.
    pub fn from_env() -> Self {
        let work_dir = std::env::var("HARVEST_WORKDIR")
            .map(PathBuf::from)
            .or_else(|_| std::env::current_dir())
            .unwrap_or_else(|_| PathBuf::from("."));

        Self {
            home: harvest_home(),
            work_dir,
            output: std::env::var("HARVEST_OUTPUT").ok().map(PathBuf::from),
            fred_api_key: std::env::var("FRED_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            user_agent: std::env::var("HARVEST_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            request_timeout: Duration::from_secs(parse_u64(
                std::env::var("HARVEST_TIMEOUT_SECS").ok().as_deref(),
                30,
            )),
            max_attempts: parse_u64(std::env::var("HARVEST_MAX_ATTEMPTS").ok().as_deref(), 3)
                .max(1) as u32,
            retry_backoff: Duration::from_millis(parse_u64(
                std::env::var("HARVEST_RETRY_BACKOFF_MS").ok().as_deref(),
                2000,
            )),
            min_request_delay: Duration::from_millis(parse_u64(
                std::env::var("HARVEST_MIN_DELAY_MS").ok().as_deref(),
                250,
            )),
            use_browser: std::env::var("HARVEST_BROWSER").is_ok(),
        }
    }

    /// Override the work directory.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Override the state directory.
    pub fn with_home(mut self, dir: impl Into<PathBuf>) -> Self {
        self.home = dir.into();
        self
    }

    /// The `output/` directory used by the scraper jobs.
    pub fn output_dir(&self) -> PathBuf {
        match &self.output {
            Some(dir) => self.resolve(dir),
            None => self.work_dir.join("output"),
        }
    }

    /// Resolve a possibly relative path against the work directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    /// Location of the JSONL run journal.
    pub fn journal_path(&self) -> PathBuf {
        self.home.join("runs.jsonl")
    }
}

/// The harvest state directory: `$HARVEST_HOME`, else `~/.harvest`.
pub fn harvest_home() -> PathBuf {
    if let Ok(home) = std::env::var("HARVEST_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".harvest")
}

fn parse_u64(value: Option<&str>, default: u64) -> u64 {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
