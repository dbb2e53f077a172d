//! Repair: rewrite every PDF of a tree into a mirror tree, first with
//! lopdf, then with Ghostscript when lopdf cannot produce a usable file.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::pdf::{text, PdfError};
use crate::storage;
use crate::tools::{self, Tool};

/// Outputs at or below this size are treated as failed rewrites.
pub const MIN_VALID_BYTES: u64 = 1024;

const GHOSTSCRIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Low-quality files listed in the summary.
pub const MAX_LISTED: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairMethod {
    Lopdf,
    Ghostscript,
}

impl std::fmt::Display for RepairMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairMethod::Lopdf => f.write_str("lopdf"),
            RepairMethod::Ghostscript => f.write_str("Ghostscript"),
        }
    }
}

/// Load, drop unreferenced objects, compress streams and save.
pub fn rewrite_with_lopdf(input: &Path, output: &Path) -> Result<(), PdfError> {
    let mut doc = text::load(input)?;
    doc.prune_objects();
    doc.compress();
    crate::pdf::save_document(&mut doc, output)
}

fn large_enough(path: &Path) -> bool {
    storage::file_size(path) > MIN_VALID_BYTES
}

pub struct Repairer {
    gs: Option<PathBuf>,
    timeout: Duration,
}

impl Repairer {
    pub fn new(gs: Option<PathBuf>) -> Self {
        Self {
            gs,
            timeout: GHOSTSCRIPT_TIMEOUT,
        }
    }

    /// Use Ghostscript when it is installed.
    pub fn detect() -> Self {
        Self::new(tools::locate(Tool::Ghostscript))
    }

    pub fn has_ghostscript(&self) -> bool {
        self.gs.is_some()
    }

    async fn rewrite_with_ghostscript(&self, gs: &Path, input: &Path, output: &Path) -> Result<(), PdfError> {
        let args = vec![
            "-sDEVICE=pdfwrite".to_string(),
            "-dNOPAUSE".to_string(),
            "-dBATCH".to_string(),
            "-dQUIET".to_string(),
            format!("-sOutputFile={}", output.display()),
            input.display().to_string(),
        ];
        let outcome = tools::run_with_timeout(gs, &args, self.timeout).await?;
        if outcome.success {
            Ok(())
        } else {
            Err(PdfError::Conversion(outcome.error_summary()))
        }
    }

    /// Try each method until one writes more than [`MIN_VALID_BYTES`].
    pub async fn repair_file(&self, input: &Path, output: &Path) -> Option<RepairMethod> {
        match rewrite_with_lopdf(input, output) {
            Ok(()) if large_enough(output) => return Some(RepairMethod::Lopdf),
            Ok(()) => debug!(file = %input.display(), "lopdf output too small"),
            Err(e) => debug!(file = %input.display(), error = %e, "lopdf rewrite failed"),
        }

        let gs = self.gs.as_deref()?;
        match self.rewrite_with_ghostscript(gs, input, output).await {
            Ok(()) if large_enough(output) => Some(RepairMethod::Ghostscript),
            Ok(()) => None,
            Err(e) => {
                debug!(file = %input.display(), error = %e, "Ghostscript rewrite failed");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    pub found: usize,
    pub already_done: usize,
    pub processed: usize,
    pub failed: Vec<PathBuf>,
    /// Repaired files whose first page has no extractable text.
    pub low_quality: Vec<PathBuf>,
}

impl RepairReport {
    pub fn attempted(&self) -> usize {
        self.found - self.already_done
    }
}

/// Repair every `*.pdf` under `src` into the same relative path under `dst`.
pub async fn repair_tree<F>(src: &Path, dst: &Path, repairer: &Repairer, mut on_file: F) -> Result<RepairReport>
where
    F: FnMut(&Path),
{
    if !src.is_dir() {
        anyhow::bail!("source directory {} not found", src.display());
    }
    storage::ensure_dir(dst)?;

    let pdfs = storage::collect_files(src, |p| storage::has_extension(p, "pdf"))?;
    let mut report = RepairReport {
        found: pdfs.len(),
        ..Default::default()
    };
    info!(source = %src.display(), files = pdfs.len(), "repairing PDFs");

    for input in pdfs {
        let rel = input
            .strip_prefix(src)
            .with_context(|| format!("{} is outside {}", input.display(), src.display()))?
            .to_path_buf();
        let output = dst.join(&rel);
        if large_enough(&output) {
            report.already_done += 1;
            continue;
        }
        on_file(&rel);

        match repairer.repair_file(&input, &output).await {
            Some(method) => {
                debug!(file = %rel.display(), %method, "repaired");
                report.processed += 1;
                if !text::first_page_has_text(&output) {
                    report.low_quality.push(rel);
                }
            }
            None => {
                warn!(file = %rel.display(), "all repair methods failed");
                report.failed.push(rel);
            }
        }
    }
    Ok(report)
}
