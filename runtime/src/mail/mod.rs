//! Mail-archive pipeline: mbox export, per-email PDF consolidation, PDF
//! repair and compression, metadata consolidation and archive search.
//!
//! Every stage reads one directory tree and writes another, so stages can
//! be rerun independently.

pub mod compress;
pub mod consolidate;
pub mod convert;
pub mod export;
pub mod metadata;
pub mod repair;
pub mod search;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

static INVALID_CHARS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
static CONTROL_CHARS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\x00-\x1f\x7f]").unwrap());
static UNDERSCORES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());
/// `YYYY-Mon` month folders written by the export stage.
pub(crate) static MONTH_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-[A-Z][a-z]{2}").unwrap());

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// A filename that is valid on Windows as well as Unix.
///
/// Names longer than 100 characters keep their first 95 characters and
/// their extension, joined by `...`.
pub fn sanitize_filename(name: &str) -> String {
    let name = INVALID_CHARS_RE.replace_all(name, "_");
    let name = CONTROL_CHARS_RE.replace_all(&name, "");
    let name = UNDERSCORES_RE.replace_all(&name, "_");
    let mut name = name.trim_matches(|c| c == ' ' || c == '.').to_string();
    if name.is_empty() {
        return "unnamed".to_string();
    }

    let stem = Path::new(&name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&name)
        .to_uppercase();
    if RESERVED_NAMES.contains(&stem.as_str()) {
        name = format!("_{name}");
    }

    crate::storage::truncate_filename(&name, 100, 95, "...")
}

/// The per-email JSON written by the export stage and read by the
/// consolidation and search stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub from: String,
    pub to: String,
    /// `YYYY-mm-dd HH:MM:SS`
    pub date: String,
    pub subject: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub attachment_count: usize,
    #[serde(default)]
    pub email_pdf: String,
    #[serde(default)]
    pub original_date_string: Option<String>,
    #[serde(default)]
    pub folder: String,
}
