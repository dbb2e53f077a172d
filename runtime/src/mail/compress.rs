//! Compression: run every PDF of a tree through Ghostscript's `pdfwrite`
//! and keep whichever of the result and the original is smaller.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::storage;
use crate::tools::{self, Tool, ToolError};

pub const COMPRESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Ghostscript `PDFSETTINGS` presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Screen,
    #[default]
    Ebook,
    Printer,
    Prepress,
}

impl CompressionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionLevel::Screen => "screen",
            CompressionLevel::Ebook => "ebook",
            CompressionLevel::Printer => "printer",
            CompressionLevel::Prepress => "prepress",
        }
    }
}

impl std::fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "screen" => Ok(CompressionLevel::Screen),
            "ebook" => Ok(CompressionLevel::Ebook),
            "printer" => Ok(CompressionLevel::Printer),
            "prepress" => Ok(CompressionLevel::Prepress),
            other => Err(format!(
                "unknown compression level '{other}' (expected screen, ebook, printer or prepress)"
            )),
        }
    }
}

pub fn ghostscript_args(level: CompressionLevel, input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-sDEVICE=pdfwrite".to_string(),
        format!("-dPDFSETTINGS=/{level}"),
        "-dCompatibilityLevel=1.4".to_string(),
        "-dNOPAUSE".to_string(),
        "-dQUIET".to_string(),
        "-dBATCH".to_string(),
        "-dDetectDuplicateImages".to_string(),
        "-dCompressFonts=true".to_string(),
        "-dEmbedAllFonts=true".to_string(),
        "-dSubsetFonts=true".to_string(),
        "-dAutoRotatePages=/None".to_string(),
        format!("-sOutputFile={}", output.display()),
        input.display().to_string(),
    ]
}

/// Which file ends up at the output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    Compressed,
    Original,
}

/// The compressed file wins when it is smaller, or always when
/// `keep_smallest` is off.
pub fn choose(original: u64, compressed: u64, keep_smallest: bool) -> Keep {
    if compressed < original || !keep_smallest {
        Keep::Compressed
    } else {
        Keep::Original
    }
}

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FileOutcome {
    /// Output was already present.
    Existing { final_bytes: u64 },
    Smaller { final_bytes: u64 },
    /// Compressed output was larger but saved anyway.
    Larger { final_bytes: u64 },
    KeptOriginal { compressed_bytes: u64 },
    TimedOut,
    Failed,
}

pub struct Compressor {
    gs: PathBuf,
    level: CompressionLevel,
    timeout: Duration,
    keep_smallest: bool,
}

impl Compressor {
    pub fn new(gs: PathBuf) -> Self {
        Self {
            gs,
            level: CompressionLevel::default(),
            timeout: COMPRESS_TIMEOUT,
            keep_smallest: true,
        }
    }

    /// Ghostscript is mandatory here; a missing install fails up front.
    pub fn detect() -> Result<Self, ToolError> {
        Ok(Self::new(tools::require(Tool::Ghostscript)?))
    }

    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn keep_smallest(mut self, keep: bool) -> Self {
        self.keep_smallest = keep;
        self
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Compress `input` to `output` through `<output>.temp.pdf`.
    /// Failures and timeouts copy the original into place.
    pub async fn compress_file(&self, input: &Path, output: &Path) -> Result<FileOutcome> {
        if output.exists() {
            return Ok(FileOutcome::Existing {
                final_bytes: storage::file_size(output),
            });
        }
        if let Some(parent) = output.parent() {
            storage::ensure_dir(parent)?;
        }

        let original = storage::file_size(input);
        let temp = output.with_extension("temp.pdf");
        let args = ghostscript_args(self.level, input, &temp);
        let run = tools::run_with_timeout(&self.gs, &args, self.timeout).await;

        let outcome = match run {
            Ok(outcome) if outcome.success && temp.exists() => {
                let compressed = storage::file_size(&temp);
                debug!(file = %input.display(), elapsed_ms = outcome.elapsed.as_millis() as u64, compressed, "compressed");
                match choose(original, compressed, self.keep_smallest) {
                    Keep::Compressed => {
                        storage::move_file(&temp, output)?;
                        if compressed < original {
                            FileOutcome::Smaller { final_bytes: compressed }
                        } else {
                            FileOutcome::Larger { final_bytes: compressed }
                        }
                    }
                    Keep::Original => {
                        storage::copy_file(input, output)?;
                        FileOutcome::KeptOriginal {
                            compressed_bytes: compressed,
                        }
                    }
                }
            }
            Ok(outcome) if outcome.timed_out => {
                warn!(file = %input.display(), "Ghostscript timed out after {}s, copying original", self.timeout.as_secs());
                storage::copy_file(input, output)?;
                FileOutcome::TimedOut
            }
            Ok(outcome) => {
                warn!(file = %input.display(), error = %outcome.error_summary(), "compression failed, copying original");
                storage::copy_file(input, output)?;
                FileOutcome::Failed
            }
            Err(e) => {
                warn!(file = %input.display(), error = %e, "compression failed, copying original");
                storage::copy_file(input, output)?;
                FileOutcome::Failed
            }
        };

        if temp.exists() {
            let _ = std::fs::remove_file(&temp);
        }
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompressReport {
    pub files: usize,
    pub successful: usize,
    pub smaller: usize,
    pub kept_original: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub original_bytes: u64,
    pub final_bytes: u64,
}

impl CompressReport {
    pub fn saved_bytes(&self) -> i64 {
        self.original_bytes as i64 - self.final_bytes as i64
    }

    /// Share of the original size saved, when anything succeeded.
    pub fn saved_percent(&self) -> Option<f64> {
        (self.successful > 0 && self.original_bytes > 0)
            .then(|| self.saved_bytes() as f64 / self.original_bytes as f64 * 100.0)
    }

    fn add(&mut self, original: u64, outcome: FileOutcome) {
        self.files += 1;
        self.original_bytes += original;
        match outcome {
            FileOutcome::Existing { final_bytes } => {
                self.successful += 1;
                self.final_bytes += final_bytes;
                if final_bytes < original {
                    self.smaller += 1;
                } else {
                    self.kept_original += 1;
                }
            }
            FileOutcome::Smaller { final_bytes } => {
                self.successful += 1;
                self.smaller += 1;
                self.final_bytes += final_bytes;
            }
            FileOutcome::Larger { final_bytes } => {
                self.successful += 1;
                self.kept_original += 1;
                self.final_bytes += final_bytes;
            }
            FileOutcome::KeptOriginal { .. } => {
                self.successful += 1;
                self.kept_original += 1;
                self.final_bytes += original;
            }
            FileOutcome::TimedOut => {
                self.timed_out += 1;
                self.final_bytes += original;
            }
            FileOutcome::Failed => {
                self.failed += 1;
                self.final_bytes += original;
            }
        }
    }
}

/// Compress every `*.pdf` under `src` into the same relative path under `dst`.
pub async fn compress_tree<F>(src: &Path, dst: &Path, compressor: &Compressor, mut on_file: F) -> Result<CompressReport>
where
    F: FnMut(&Path, &FileOutcome),
{
    if !src.is_dir() {
        anyhow::bail!("source directory {} not found", src.display());
    }
    storage::ensure_dir(dst)?;

    let pdfs = storage::collect_files(src, |p| storage::has_extension(p, "pdf"))?;
    info!(source = %src.display(), files = pdfs.len(), level = %compressor.level, "compressing PDFs");
    let mut report = CompressReport::default();

    for input in pdfs {
        let rel = input
            .strip_prefix(src)
            .with_context(|| format!("{} is outside {}", input.display(), src.display()))?;
        let original = storage::file_size(&input);
        let outcome = compressor.compress_file(&input, &dst.join(rel)).await?;
        on_file(rel, &outcome);
        report.add(original, outcome);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!("Screen".parse::<CompressionLevel>().unwrap(), CompressionLevel::Screen);
        assert_eq!(CompressionLevel::default(), CompressionLevel::Ebook);
        assert!("tiny".parse::<CompressionLevel>().is_err());
    }

    #[test]
    fn test_ghostscript_args() {
        let args = ghostscript_args(CompressionLevel::Printer, Path::new("in.pdf"), Path::new("out.temp.pdf"));
        assert!(args.contains(&"-dPDFSETTINGS=/printer".to_string()));
        assert!(args.contains(&"-dCompatibilityLevel=1.4".to_string()));
        assert!(args.contains(&"-dAutoRotatePages=/None".to_string()));
        assert_eq!(args[args.len() - 2], "-sOutputFile=out.temp.pdf");
        assert_eq!(args.last().unwrap(), "in.pdf");
    }

    #[test]
    fn test_choose_keeps_smallest() {
        assert_eq!(choose(100, 60, true), Keep::Compressed);
        assert_eq!(choose(100, 100, true), Keep::Original);
        assert_eq!(choose(100, 140, true), Keep::Original);
        assert_eq!(choose(100, 140, false), Keep::Compressed);
    }

    #[test]
    fn test_report_percentages() {
        let mut report = CompressReport::default();
        report.add(1000, FileOutcome::Smaller { final_bytes: 400 });
        report.add(1000, FileOutcome::KeptOriginal { compressed_bytes: 1200 });
        report.add(500, FileOutcome::Failed);
        assert_eq!(report.successful, 2);
        assert_eq!(report.final_bytes, 1900);
        assert_eq!(report.saved_bytes(), 600);
        let pct = report.saved_percent().unwrap();
        assert!((pct - 24.0).abs() < 1e-9);
        assert!(CompressReport::default().saved_percent().is_none());
    }

    #[cfg(unix)]
    fn fake_gs(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-gs");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compress_tree_with_stand_in_ghostscript() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("fixed");
        std::fs::create_dir_all(src.join("2023-Jan")).unwrap();
        std::fs::write(src.join("2023-Jan").join("big.pdf"), vec![b'x'; 4096]).unwrap();
        std::fs::write(src.join("tiny.pdf"), b"xx").unwrap();

        // Writes the first 100 bytes of the input to the output file.
        let gs = fake_gs(
            dir.path(),
            r#"for a in "$@"; do case "$a" in -sOutputFile=*) out="${a#-sOutputFile=}";; esac; last="$a"; done; head -c 100 "$last" > "$out""#,
        );
        let dst = dir.path().join("compressed");
        let compressor = Compressor::new(gs);
        let mut seen = Vec::new();
        let report = compress_tree(&src, &dst, &compressor, |rel, outcome| {
            seen.push((rel.to_path_buf(), *outcome));
        })
        .await
        .unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.smaller, 1);
        assert_eq!(report.kept_original, 1);
        assert_eq!(storage::file_size(&dst.join("2023-Jan").join("big.pdf")), 100);
        assert_eq!(storage::file_size(&dst.join("tiny.pdf")), 2);
        assert!(!dst.join("2023-Jan").join("big.temp.pdf").exists());
        assert_eq!(seen[0].1, FileOutcome::Smaller { final_bytes: 100 });

        let again = compress_tree(&src, &dst, &compressor, |_, _| {}).await.unwrap();
        assert_eq!(again.successful, 2);
        assert_eq!(again.smaller, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_ghostscript_copies_original() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, b"%PDF-1.4 original").unwrap();
        let compressor = Compressor::new(fake_gs(dir.path(), "echo 'Unrecoverable error' >&2; exit 1"));

        let output = dir.path().join("out").join("in.pdf");
        let outcome = compressor.compress_file(&input, &output).await.unwrap();
        assert_eq!(outcome, FileOutcome::Failed);
        assert_eq!(std::fs::read(&output).unwrap(), b"%PDF-1.4 original");
    }
}
