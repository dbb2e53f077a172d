//! `harvest fbi`: FBI Vault search, PDF download and text extraction.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::cli::output::{self, Styled};
use crate::cli::{http_client, journaled, page_source};
use crate::config::Config;
use crate::pdf::OcrEngine;
use crate::sources::fbi_vault::{
    self, DownloadReport, OcrPhaseReport, PdfStore, VaultDownloader, VaultJob, VaultLayout, VaultOptions,
};

#[derive(Args, Debug, Clone)]
pub struct TermArgs {
    /// Search term
    pub term: String,
    /// Directory for downloaded PDFs (default: <output>/fbi_vault_pdfs)
    #[arg(long)]
    pub pdf_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Stop after this many new downloads (skips verification)
    #[arg(long = "max")]
    pub max_documents: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct OcrArgs {
    /// Keep PDFs after their text is extracted (default)
    #[arg(long, overrides_with = "no_keep_pdfs")]
    pub keep_pdfs: bool,
    /// Delete PDFs after their text is extracted
    #[arg(long, overrides_with = "keep_pdfs")]
    pub no_keep_pdfs: bool,
    /// Exit successfully even when some PDFs yielded no text
    #[arg(long)]
    pub allow_incomplete: bool,
    #[arg(long, default_value_t = 3)]
    pub passes: u32,
    /// Seconds between OCR passes
    #[arg(long, default_value_t = 10)]
    pub pass_pause: u64,
}

#[derive(Subcommand, Debug)]
pub enum FbiCommand {
    /// Download phase, then OCR phase
    Run {
        #[command(flatten)]
        target: TermArgs,
        #[command(flatten)]
        download: DownloadArgs,
        #[command(flatten)]
        ocr: OcrArgs,
    },
    /// Download every result PDF not yet tracked
    Download {
        #[command(flatten)]
        target: TermArgs,
        #[command(flatten)]
        download: DownloadArgs,
    },
    /// Extract text from tracked PDFs that are not complete
    Ocr {
        #[command(flatten)]
        target: TermArgs,
        #[command(flatten)]
        ocr: OcrArgs,
    },
    /// Show tracking and results counts for a term
    Status {
        #[command(flatten)]
        target: TermArgs,
    },
}

fn layout(config: &Config, target: &TermArgs) -> VaultLayout {
    let layout = VaultLayout::new(config.output_dir());
    match &target.pdf_dir {
        Some(dir) => layout.with_pdf_dir(config.resolve(dir)),
        None => layout,
    }
}

fn options(target: &TermArgs, download: Option<&DownloadArgs>, ocr: Option<&OcrArgs>) -> VaultOptions {
    let mut options = VaultOptions::new(target.term.trim());
    if let Some(download) = download {
        options.max_documents = download.max_documents;
    }
    if let Some(ocr) = ocr {
        options.ocr.keep_pdfs = !ocr.no_keep_pdfs;
        options.ocr.passes = ocr.passes.max(1);
        options.ocr.pass_pause = Duration::from_secs(ocr.pass_pause);
    }
    options
}

fn ocr_engine() -> Option<OcrEngine> {
    let engine = OcrEngine::detect();
    if engine.is_none() {
        warn!("pdftoppm or tesseract not found; scanned pages will yield no text (see 'harvest doctor')");
    }
    engine
}

fn print_download(report: &DownloadReport) {
    let s = Styled::new();
    let available = report
        .available
        .map(|n| format!(" of {n} listed"))
        .unwrap_or_default();
    output::say(&format!(
        "{} downloads{available}: {} saved, {} already tracked, {} failed",
        s.ok_sym(),
        report.summary.saved,
        report.summary.skipped,
        report.summary.failed
    ));
    if report.missing > 0 {
        output::say(&format!("{} {} results still missing after verification", s.warn_sym(), report.missing));
    }
}

/// Report the OCR phase; incomplete extraction fails the command unless allowed.
fn finish_ocr(report: &OcrPhaseReport, allow_incomplete: bool) -> Result<()> {
    let s = Styled::new();
    output::say(&format!(
        "{} text extracted from {} PDFs in {} passes",
        s.ok_sym(),
        report.completed,
        report.passes
    ));
    if report.is_complete() {
        return Ok(());
    }
    output::say(&format!("{} {} PDFs still without text:", s.warn_sym(), report.remaining.len()));
    for path in report.remaining.iter().take(10) {
        output::print_detail(path);
    }
    if report.remaining.len() > 10 {
        output::print_detail(&format!("... and {} more", report.remaining.len() - 10));
    }
    if allow_incomplete {
        return Ok(());
    }
    bail!(
        "{} PDFs could not be read; rerun 'harvest fbi ocr' or pass --allow-incomplete",
        report.remaining.len()
    )
}

pub async fn run(config: &Config, command: FbiCommand) -> Result<()> {
    match command {
        FbiCommand::Status { target } => {
            let status = fbi_vault::status(&layout(config, &target), target.term.trim());
            if output::is_json() {
                output::print_json_report(&status);
                return Ok(());
            }
            let s = Styled::new();
            output::print_section(&s, &format!("FBI Vault: {}", status.term));
            output::print_check(s.info_sym(), "Tracking file:", &status.tracking_file.display().to_string());
            output::print_check(s.info_sym(), "Downloaded:", &status.counts.total.to_string());
            output::print_check(s.ok_sym(), "Text extracted:", &status.counts.complete.to_string());
            output::print_check(s.info_sym(), "Pending:", &status.counts.pending.to_string());
            let failed_sym = if status.counts.failed > 0 { s.warn_sym() } else { s.ok_sym() };
            output::print_check(failed_sym, "Failed:", &status.counts.failed.to_string());
            output::print_check(s.info_sym(), "Results:", &status.results.to_string());
            Ok(())
        }
        FbiCommand::Download { target, download } => {
            let layout = layout(config, &target);
            let options = options(&target, Some(&download), None);
            let downloader = VaultDownloader::new(http_client(config)?, PdfStore::new(layout.pdf_dir()));
            let source = page_source(config).await?;
            let job = VaultJob::new(source.as_ref(), downloader, layout, options);
            let result = journaled(config, "fbi", "download", Some(target.term.as_str()), async {
                let report = job.download_phase().await?;
                let saved = report.summary.saved as u64;
                Ok((report, Some(saved)))
            })
            .await;
            source.shutdown().await;
            let report = result?;
            if output::is_json() {
                output::print_json_report(&report);
            } else {
                print_download(&report);
            }
            Ok(())
        }
        FbiCommand::Ocr { target, ocr } => {
            let layout = layout(config, &target);
            let options = options(&target, None, Some(&ocr));
            let downloader = VaultDownloader::new(http_client(config)?, PdfStore::new(layout.pdf_dir()));
            let source = page_source(config).await?;
            let job = VaultJob::new(source.as_ref(), downloader, layout, options).with_ocr(ocr_engine());
            let result = journaled(config, "fbi", "ocr", Some(target.term.as_str()), async {
                let report = job.ocr_phase().await?;
                let done = report.completed as u64;
                Ok((report, Some(done)))
            })
            .await;
            source.shutdown().await;
            let report = result?;
            if output::is_json() {
                output::print_json_report(&report);
            }
            finish_ocr(&report, ocr.allow_incomplete)
        }
        FbiCommand::Run { target, download, ocr } => {
            let layout = layout(config, &target);
            let options = options(&target, Some(&download), Some(&ocr));
            let downloader = VaultDownloader::new(http_client(config)?, PdfStore::new(layout.pdf_dir()));
            let source = page_source(config).await?;
            let job = VaultJob::new(source.as_ref(), downloader, layout, options).with_ocr(ocr_engine());
            let result = journaled(config, "fbi", "run", Some(target.term.as_str()), async {
                let (downloads, ocr) = job.run().await?;
                let done = ocr.completed as u64;
                Ok(((downloads, ocr), Some(done)))
            })
            .await;
            source.shutdown().await;
            let (downloads, report) = result?;
            if output::is_json() {
                output::print_json(&serde_json::json!({
                    "download": serde_json::to_value(&downloads)?,
                    "ocr": serde_json::to_value(&report)?,
                }));
            } else {
                print_download(&downloads);
            }
            finish_ocr(&report, ocr.allow_incomplete)
        }
    }
}
