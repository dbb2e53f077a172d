//! `harvest mail`: the mail-archive stages.
//!
//! Each stage reads one directory and writes the next, with these defaults
//! (relative to the work directory):
//!
//! ```text
//! export       mbox                 -> gmail_archive
//! consolidate  gmail_archive        -> gmail_consolidated
//! repair       gmail_consolidated   -> gmail_pdf_fixed
//! compress     gmail_pdf_fixed      -> gmail_pdf_compressed
//! metadata     gmail_consolidated   -> gmail_pdf_compressed
//! search       gmail_pdf_compressed/master_metadata.json
//! ```

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::output::{self, Styled};
use crate::cli::{journaled, progress};
use crate::config::Config;
use crate::mail::compress::{self, CompressionLevel, Compressor, FileOutcome, COMPRESS_TIMEOUT};
use crate::mail::consolidate;
use crate::mail::convert::{AttachmentConverter, ConversionError};
use crate::mail::export;
use crate::mail::metadata::{self, MASTER_FILE};
use crate::mail::repair::{self, Repairer, MAX_LISTED};
use crate::mail::search;

const ARCHIVE_DIR: &str = "gmail_archive";
const CONSOLIDATED_DIR: &str = "gmail_consolidated";
const FIXED_DIR: &str = "gmail_pdf_fixed";
const COMPRESSED_DIR: &str = "gmail_pdf_compressed";

#[derive(Subcommand, Debug)]
pub enum MailCommand {
    /// Split an mbox export into per-email folders (PDF, JSON, attachments)
    Export {
        mbox: PathBuf,
        #[arg(long, default_value = ARCHIVE_DIR)]
        out: PathBuf,
    },
    /// Merge each email and its attachments into one PDF per email
    Consolidate {
        #[arg(long, default_value = ARCHIVE_DIR)]
        source: PathBuf,
        #[arg(long, default_value = CONSOLIDATED_DIR)]
        dest: PathBuf,
    },
    /// Rewrite every PDF so it opens cleanly
    Repair {
        #[arg(long, default_value = CONSOLIDATED_DIR)]
        source: PathBuf,
        #[arg(long, default_value = FIXED_DIR)]
        dest: PathBuf,
    },
    /// Shrink every PDF with Ghostscript
    Compress {
        #[arg(long, default_value = FIXED_DIR)]
        source: PathBuf,
        #[arg(long, default_value = COMPRESSED_DIR)]
        dest: PathBuf,
        /// screen, ebook, printer or prepress
        #[arg(long, default_value_t = CompressionLevel::default())]
        level: CompressionLevel,
        /// Keep the compressed file even when it is larger
        #[arg(long)]
        keep_larger: bool,
        /// Per-file Ghostscript timeout in seconds
        #[arg(long, default_value_t = COMPRESS_TIMEOUT.as_secs())]
        timeout: u64,
    },
    /// Copy the JSON metadata next to the PDFs and build the master file
    Metadata {
        #[arg(long, default_value = CONSOLIDATED_DIR)]
        source: PathBuf,
        #[arg(long, default_value = COMPRESSED_DIR)]
        dest: PathBuf,
    },
    /// Find emails containing every term and write a text report
    Search {
        #[arg(required = true)]
        terms: Vec<String>,
        #[arg(long)]
        master: Option<PathBuf>,
        /// Report directory (default: the work directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn target(path: &Path) -> String {
    path.display().to_string()
}

async fn export(config: &Config, mbox: &Path, out: &Path) -> Result<()> {
    let bar = progress::create_bar(0, "messages");
    let report = journaled(config, "mail", "export", Some(&target(mbox)), async {
        let report = export::export_mbox(mbox, out, |done, total| progress::track(&bar, done, total))?;
        let n = report.processed as u64;
        Ok((report, Some(n)))
    })
    .await?;
    progress::finish_done(&bar, "export");

    if output::is_json() {
        output::print_json_report(&report);
        return Ok(());
    }
    let s = Styled::new();
    output::say(&format!("{} {} of {} messages -> {}", s.ok_sym(), report.processed, report.total, out.display()));
    if report.errors > 0 {
        output::say(&format!("{} {} messages failed", s.warn_sym(), report.errors));
        for sample in &report.error_samples {
            output::print_detail(sample);
        }
    }
    Ok(())
}

async fn consolidate(config: &Config, source: &Path, dest: &Path) -> Result<()> {
    let converter = AttachmentConverter::detect();
    let s = Styled::new();
    if !converter.has_office() {
        output::say(&format!(
            "{} LibreOffice not found; office attachments get a summary page",
            s.warn_sym()
        ));
    }

    let spinner = progress::create_spinner("consolidating");
    let result = journaled(config, "mail", "consolidate", Some(&target(source)), async {
        let report = consolidate::consolidate_archive(source, dest, &converter, |name| {
            spinner.set_message(name.to_string())
        })
        .await?;
        let n = report.emails as u64;
        Ok((report, Some(n)))
    })
    .await;
    spinner.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let Some(conversion) = e.downcast_ref::<ConversionError>() {
                output::say(&format!("{} conversion failed: {conversion}", s.fail_sym()));
            }
            return Err(e.context("consolidation stopped"));
        }
    };

    if output::is_json() {
        output::print_json_report(&report);
        return Ok(());
    }
    output::say(&format!(
        "{} {} emails in {} months -> {}",
        s.ok_sym(),
        report.emails,
        report.months,
        dest.display()
    ));
    output::print_detail(&format!("{} attachment pages", report.attachment_pages));
    if report.summary_pages > 0 {
        output::print_detail(&format!("{} attachments summarized", report.summary_pages));
    }
    if report.embedded_only > 0 {
        output::print_detail(&format!("{} attachments embedded only", report.embedded_only));
    }
    if report.skipped > 0 {
        output::print_detail(&format!("{} folders skipped", report.skipped));
    }
    Ok(())
}

async fn repair(config: &Config, source: &Path, dest: &Path) -> Result<()> {
    let repairer = Repairer::detect();
    let s = Styled::new();
    if !repairer.has_ghostscript() {
        output::say(&format!("{} Ghostscript not found; only the lopdf rewrite is available", s.warn_sym()));
    }

    let spinner = progress::create_spinner("repairing");
    let report = journaled(config, "mail", "repair", Some(&target(source)), async {
        let report = repair::repair_tree(source, dest, &repairer, |rel| {
            spinner.set_message(rel.display().to_string())
        })
        .await?;
        let n = report.processed as u64;
        Ok((report, Some(n)))
    })
    .await?;
    spinner.finish_and_clear();

    if output::is_json() {
        output::print_json_report(&report);
        return Ok(());
    }
    output::say(&format!(
        "{} {} PDFs found, {} already repaired, {} repaired, {} failed",
        s.ok_sym(),
        report.found,
        report.already_done,
        report.processed,
        report.failed.len()
    ));
    for path in &report.failed {
        output::print_detail(&format!("failed: {}", path.display()));
    }
    if !report.low_quality.is_empty() {
        output::say(&format!(
            "{} {} PDFs may not have selectable text",
            s.warn_sym(),
            report.low_quality.len()
        ));
        for path in report.low_quality.iter().take(MAX_LISTED) {
            output::print_detail(&path.display().to_string());
        }
        if report.low_quality.len() > MAX_LISTED {
            output::print_detail(&format!("... and {} more", report.low_quality.len() - MAX_LISTED));
        }
    }
    Ok(())
}

fn outcome_label(outcome: &FileOutcome) -> &'static str {
    match outcome {
        FileOutcome::Existing { .. } => "exists",
        FileOutcome::Smaller { .. } => "compressed",
        FileOutcome::Larger { .. } => "larger, kept",
        FileOutcome::KeptOriginal { .. } => "original kept",
        FileOutcome::TimedOut => "timed out",
        FileOutcome::Failed => "failed",
    }
}

async fn compress(
    config: &Config,
    source: &Path,
    dest: &Path,
    level: CompressionLevel,
    keep_larger: bool,
    timeout: u64,
) -> Result<()> {
    let compressor = Compressor::detect()
        .context("compression needs Ghostscript")?
        .with_level(level)
        .with_timeout(Duration::from_secs(timeout))
        .keep_smallest(!keep_larger);

    let spinner = progress::create_spinner("compressing");
    let report = journaled(config, "mail", "compress", Some(&target(source)), async {
        let report = compress::compress_tree(source, dest, &compressor, |rel, outcome| {
            spinner.set_message(format!("{} ({})", rel.display(), outcome_label(outcome)))
        })
        .await?;
        let n = report.successful as u64;
        Ok((report, Some(n)))
    })
    .await?;
    spinner.finish_and_clear();

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "report": report,
            "saved_bytes": report.saved_bytes(),
            "saved_percent": report.saved_percent(),
        }));
        return Ok(());
    }

    let s = Styled::new();
    output::print_section(&s, &format!("Compression ({level})"));
    output::print_check(s.ok_sym(), "successful", &format!("{}/{}", report.successful, report.files));
    output::print_check(s.ok_sym(), "smaller", &report.smaller.to_string());
    output::print_check(s.info_sym(), "kept original", &report.kept_original.to_string());
    if report.timed_out > 0 {
        output::print_check(s.warn_sym(), "timed out", &report.timed_out.to_string());
    }
    if report.failed > 0 {
        output::print_check(s.fail_sym(), "failed", &report.failed.to_string());
    }
    output::print_check(s.info_sym(), "original size", &output::format_size(report.original_bytes));
    output::print_check(s.info_sym(), "final size", &output::format_size(report.final_bytes));
    if let Some(percent) = report.saved_percent() {
        let saved = report.saved_bytes();
        let amount = output::format_size(saved.unsigned_abs());
        let sign = if saved < 0 { "-" } else { "" };
        output::print_check(s.ok_sym(), "saved", &format!("{sign}{amount} ({percent:.1}%)"));
    }
    Ok(())
}

async fn metadata(config: &Config, source: &Path, dest: &Path) -> Result<()> {
    let report = journaled(config, "mail", "metadata", Some(&target(source)), async {
        let report = metadata::consolidate_metadata(source, dest)?;
        let n = report.loaded as u64;
        Ok((report, Some(n)))
    })
    .await?;

    if output::is_json() {
        output::print_json_report(&report);
        return Ok(());
    }
    let s = Styled::new();
    output::say(&format!(
        "{} {} JSON files: {} copied, {} already present, {} errors",
        s.ok_sym(),
        report.found,
        report.copied,
        report.skipped,
        report.errors
    ));
    output::say(&format!("{} files in {}", report.loaded, report.master.display()));
    Ok(())
}

fn search_archive(config: &Config, terms: &[String], master: Option<&Path>, out: Option<&Path>) -> Result<()> {
    let master = match master {
        Some(path) => config.resolve(path),
        None => config.resolve(Path::new(COMPRESSED_DIR)).join(MASTER_FILE),
    };
    let out_dir = out.map(|p| config.resolve(p)).unwrap_or_else(|| config.work_dir.clone());
    let (path, matches) = search::write_search_report(&master, terms, &out_dir)?;

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "terms": terms,
            "matches": matches,
            "report": path.display().to_string(),
        }));
    } else {
        output::say(&format!(
            "{} {matches} matching emails -> {}",
            Styled::new().ok_sym(),
            path.display()
        ));
    }
    Ok(())
}

pub async fn run(config: &Config, command: MailCommand) -> Result<()> {
    match command {
        MailCommand::Export { mbox, out } => export(config, &config.resolve(&mbox), &config.resolve(&out)).await,
        MailCommand::Consolidate { source, dest } => {
            consolidate(config, &config.resolve(&source), &config.resolve(&dest)).await
        }
        MailCommand::Repair { source, dest } => repair(config, &config.resolve(&source), &config.resolve(&dest)).await,
        MailCommand::Compress {
            source,
            dest,
            level,
            keep_larger,
            timeout,
        } => {
            compress(
                config,
                &config.resolve(&source),
                &config.resolve(&dest),
                level,
                keep_larger,
                timeout,
            )
            .await
        }
        MailCommand::Metadata { source, dest } => {
            metadata(config, &config.resolve(&source), &config.resolve(&dest)).await
        }
        MailCommand::Search { terms, master, out } => {
            search_archive(config, &terms, master.as_deref(), out.as_deref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(subcommand)]
        command: MailCommand,
    }

    #[test]
    fn test_stage_defaults_chain() {
        let Harness { command } = Harness::try_parse_from(["t", "compress"]).unwrap();
        match command {
            MailCommand::Compress {
                source,
                dest,
                level,
                keep_larger,
                timeout,
            } => {
                assert_eq!(source, PathBuf::from(FIXED_DIR));
                assert_eq!(dest, PathBuf::from(COMPRESSED_DIR));
                assert_eq!(level, CompressionLevel::Ebook);
                assert!(!keep_larger);
                assert_eq!(timeout, 60);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_search_needs_terms() {
        assert!(Harness::try_parse_from(["t", "search"]).is_err());
        let Harness { command } = Harness::try_parse_from(["t", "search", "budget", "2021"]).unwrap();
        assert!(matches!(command, MailCommand::Search { terms, .. } if terms == ["budget", "2021"]));
    }

    #[test]
    fn test_level_flag() {
        let Harness { command } = Harness::try_parse_from(["t", "compress", "--level", "screen"]).unwrap();
        assert!(matches!(command, MailCommand::Compress { level: CompressionLevel::Screen, .. }));
    }
}
