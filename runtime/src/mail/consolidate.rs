//! Consolidation: one PDF per email holding the email pages, an
//! `ATTACHMENTS` separator, the converted attachment pages and every
//! original attachment as an embedded file. Each month also gets a JSON
//! file with the metadata of all its emails.

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::convert::{AttachmentConverter, ConversionError};
use super::MONTH_DIR_RE;
use crate::pdf::{PdfMerger, TextDocument};
use crate::storage;

/// Attachments above this size are embedded without conversion.
pub const MAX_CONVERT_BYTES: u64 = 50 * 1024 * 1024;

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// `YYYY-Mon` folders of an export tree, sorted.
pub fn month_folders(source: &Path) -> Result<Vec<PathBuf>> {
    storage::list_dir(source, |p| {
        p.is_dir()
            && p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| MONTH_DIR_RE.is_match(n))
    })
}

/// Email folders of a month; names starting with `_` are skipped.
pub fn email_folders(month: &Path) -> Result<Vec<PathBuf>> {
    storage::list_dir(month, |p| p.is_dir() && !file_name(p).starts_with('_'))
}

/// The files of one exported email.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailFolder {
    pub path: PathBuf,
    pub name: String,
    pub metadata: PathBuf,
    pub email_pdf: PathBuf,
    pub attachments: Vec<PathBuf>,
}

/// Why an email folder was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoMetadata,
    NoPdf,
}

/// Sort out an email folder: the first JSON is the metadata, the email
/// PDF is the one named after the folder's date prefix (else the first
/// PDF), and everything else is an attachment.
pub fn scan_email_folder(dir: &Path) -> Result<Result<EmailFolder, SkipReason>> {
    let name = file_name(dir);
    let files = storage::list_dir(dir, |p| p.is_file())?;

    let Some(metadata) = files.iter().find(|p| storage::has_extension(p, "json")).cloned() else {
        return Ok(Err(SkipReason::NoMetadata));
    };
    let prefix: String = name.chars().take(8).collect();
    let pdfs: Vec<&PathBuf> = files.iter().filter(|p| storage::has_extension(p, "pdf")).collect();
    let email_pdf = pdfs
        .iter()
        .find(|p| file_name(p).starts_with(&prefix))
        .or_else(|| pdfs.first())
        .map(|p| (*p).clone());
    let Some(email_pdf) = email_pdf else {
        return Ok(Err(SkipReason::NoPdf));
    };

    let attachments = files
        .iter()
        .filter(|p| !storage::has_extension(p, "json") && **p != email_pdf)
        .cloned()
        .collect();
    Ok(Ok(EmailFolder {
        path: dir.to_path_buf(),
        name,
        metadata,
        email_pdf,
        attachments,
    }))
}

/// Counts for one consolidated email.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmailStats {
    pub email_pages: usize,
    pub attachment_pages: usize,
    pub summary_pages: usize,
    pub embedded_only: usize,
}

/// Build `<dest>/<folder>_complete.pdf`.
pub async fn consolidate_email(
    folder: &EmailFolder,
    dest: &Path,
    converter: &AttachmentConverter,
) -> Result<(PathBuf, EmailStats), ConversionError> {
    let mut merger = PdfMerger::new();
    let mut stats = EmailStats {
        email_pages: merger
            .append_file(&folder.email_pdf)
            .map_err(|source| ConversionError::EmailPdf {
                path: folder.email_pdf.clone(),
                source,
            })?,
        ..Default::default()
    };

    if !folder.attachments.is_empty() {
        let mut separator = TextDocument::new();
        separator.heading("ATTACHMENTS", 10);
        merger
            .append_text(&separator)
            .map_err(|source| ConversionError::Pages {
                name: "ATTACHMENTS".to_string(),
                source,
            })?;

        let scratch = tempfile::tempdir().map_err(|source| ConversionError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        for path in &folder.attachments {
            let name = file_name(path);
            let io_err = |source| ConversionError::Io {
                path: path.clone(),
                source,
            };

            if storage::file_size(path) > MAX_CONVERT_BYTES {
                warn!(file = %name, "large file, embedding only");
                merger.embed_file(&name, std::fs::read(path).map_err(io_err)?);
                stats.embedded_only += 1;
                continue;
            }

            let converted = converter.convert(path, scratch.path()).await.map_err(io_err)?;
            let pages = merger
                .append_document(converted.document)
                .map_err(|source| ConversionError::Pages {
                    name: name.clone(),
                    source,
                })?;
            if converted.summary_only {
                stats.summary_pages += pages;
            } else {
                stats.attachment_pages += pages;
            }
            merger.embed_file(&name, std::fs::read(path).map_err(io_err)?);
        }
    }

    let output = dest.join(format!("{}_complete.pdf", folder.name));
    merger
        .save(&output)
        .map_err(|source| ConversionError::Output {
            path: output.clone(),
            source,
        })?;
    Ok((output, stats))
}

/// Metadata entry of the month JSON: the email's own JSON plus
/// `pdf_file`, `original_folder` and the attachment names.
pub fn month_entry(folder: &EmailFolder, pdf_file: &str) -> Result<Map<String, Value>> {
    let mut meta: Map<String, Value> = storage::read_json(&folder.metadata)?;
    meta.insert("pdf_file".into(), Value::from(pdf_file));
    meta.insert("original_folder".into(), Value::from(folder.name.clone()));
    meta.insert(
        "attachments".into(),
        Value::from(folder.attachments.iter().map(|p| file_name(p)).collect::<Vec<_>>()),
    );
    Ok(meta)
}

#[derive(Debug, Serialize)]
struct MonthSummary<'a> {
    month: &'a str,
    generated: String,
    total_emails: usize,
    emails: Vec<Map<String, Value>>,
}

/// Write `<month>_consolidated.json` with entries sorted by `date`.
pub fn write_month_json(dest_month: &Path, month: &str, mut emails: Vec<Map<String, Value>>) -> Result<PathBuf> {
    emails.sort_by(|a, b| {
        let date = |m: &Map<String, Value>| m.get("date").and_then(Value::as_str).unwrap_or("").to_string();
        date(a).cmp(&date(b))
    });
    let path = dest_month.join(format!("{month}_consolidated.json"));
    storage::write_json_pretty(
        &path,
        &MonthSummary {
            month,
            generated: Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            total_emails: emails.len(),
            emails,
        },
    )?;
    Ok(path)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidateReport {
    pub months: usize,
    pub emails: usize,
    pub skipped: usize,
    pub attachment_pages: usize,
    pub summary_pages: usize,
    pub embedded_only: usize,
}

/// Consolidate every month of `source` into `dest`.
///
/// A [`ConversionError`] stops the run; it comes back wrapped in the
/// failing folder as context.
pub async fn consolidate_archive<F>(
    source: &Path,
    dest: &Path,
    converter: &AttachmentConverter,
    mut on_email: F,
) -> Result<ConsolidateReport>
where
    F: FnMut(&str),
{
    storage::ensure_dir(dest)?;
    let months = month_folders(source)?;
    info!(source = %source.display(), months = months.len(), "consolidating archive");
    let mut report = ConsolidateReport::default();

    for month_dir in months {
        let month = file_name(&month_dir);
        let dest_month = dest.join(&month);
        storage::ensure_dir(&dest_month)?;
        let mut entries = Vec::new();

        for dir in email_folders(&month_dir)? {
            let folder = match scan_email_folder(&dir)? {
                Ok(folder) => folder,
                Err(reason) => {
                    warn!(folder = %dir.display(), ?reason, "skipping email folder");
                    report.skipped += 1;
                    continue;
                }
            };
            on_email(&folder.name);

            let (output, stats) = consolidate_email(&folder, &dest_month, converter)
                .await
                .with_context(|| format!("failed while processing {}", folder.path.display()))?;
            report.emails += 1;
            report.attachment_pages += stats.attachment_pages;
            report.summary_pages += stats.summary_pages;
            report.embedded_only += stats.embedded_only;

            let entry = month_entry(&folder, &file_name(&output))?;
            entries.push(entry);
        }

        if !entries.is_empty() {
            write_month_json(&dest_month, &month, entries)?;
        }
        report.months += 1;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::EmailRecord;
    use crate::pdf::merge::embedded_file_names;

    fn write_email(month: &Path, folder: &str, date: &str, attachments: &[(&str, &[u8])]) -> PathBuf {
        let dir = month.join(folder);
        std::fs::create_dir_all(&dir).unwrap();
        let mut doc = TextDocument::new();
        doc.paragraph(&format!("Email {folder}"));
        doc.save(&dir.join(format!("{folder}.pdf"))).unwrap();
        for (name, data) in attachments {
            std::fs::write(dir.join(name), data).unwrap();
        }
        let record = EmailRecord {
            date: date.to_string(),
            subject: folder.to_string(),
            folder: folder.to_string(),
            ..Default::default()
        };
        storage::write_json_pretty(&dir.join(format!("{folder}.json")), &record).unwrap();
        dir
    }

    #[test]
    fn test_scan_email_folder() {
        let dir = tempfile::tempdir().unwrap();
        let email = write_email(dir.path(), "20230105_Hello", "2023-01-05 08:00:00", &[("notes.txt", b"hi")]);
        std::fs::write(email.join("another.pdf"), b"%PDF").unwrap();

        let folder = scan_email_folder(&email).unwrap().unwrap();
        assert!(folder.email_pdf.ends_with("20230105_Hello.pdf"));
        assert_eq!(folder.attachments.len(), 2);

        let empty = dir.path().join("20230106_Empty");
        std::fs::create_dir_all(&empty).unwrap();
        assert_eq!(scan_email_folder(&empty).unwrap(), Err(SkipReason::NoMetadata));
        std::fs::write(empty.join("x.json"), "{}").unwrap();
        assert_eq!(scan_email_folder(&empty).unwrap(), Err(SkipReason::NoPdf));
    }

    #[tokio::test]
    async fn test_consolidate_archive() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("gmail_archive");
        let jan = source.join("2023-Jan");
        write_email(&jan, "20230120_Later", "2023-01-20 09:00:00", &[]);
        write_email(
            &jan,
            "20230105_Hello",
            "2023-01-05 08:00:00",
            &[("notes.txt", b"attachment text"), ("blob.bin", &[0u8, 1, 2])],
        );
        std::fs::create_dir_all(jan.join("_ignored")).unwrap();
        std::fs::create_dir_all(source.join("not-a-month")).unwrap();

        let dest = dir.path().join("gmail_consolidated");
        let converter = AttachmentConverter::new(None);
        let mut seen = Vec::new();
        let report = consolidate_archive(&source, &dest, &converter, |name| seen.push(name.to_string()))
            .await
            .unwrap();

        assert_eq!(report.months, 1);
        assert_eq!(report.emails, 2);
        assert_eq!(report.attachment_pages, 1);
        assert_eq!(report.summary_pages, 1);
        assert_eq!(seen, vec!["20230105_Hello", "20230120_Later"]);

        let pdf = dest.join("2023-Jan").join("20230105_Hello_complete.pdf");
        let doc = lopdf::Document::load(&pdf).unwrap();
        // email, separator, text attachment, summary
        assert_eq!(doc.get_pages().len(), 4);
        assert!(doc.extract_text(&[2]).unwrap().contains("ATTACHMENTS"));
        assert_eq!(embedded_file_names(&doc), vec!["blob.bin", "notes.txt"]);

        let later = lopdf::Document::load(dest.join("2023-Jan").join("20230120_Later_complete.pdf")).unwrap();
        assert_eq!(later.get_pages().len(), 1);

        let month: Value = storage::read_json(&dest.join("2023-Jan").join("2023-Jan_consolidated.json")).unwrap();
        assert_eq!(month["month"], "2023-Jan");
        assert_eq!(month["total_emails"], 2);
        assert_eq!(month["emails"][0]["original_folder"], "20230105_Hello");
        assert_eq!(month["emails"][0]["pdf_file"], "20230105_Hello_complete.pdf");
        assert_eq!(month["emails"][0]["attachments"].as_array().unwrap().len(), 2);
        assert_eq!(month["emails"][1]["date"], "2023-01-20 09:00:00");
    }

    #[tokio::test]
    async fn test_unreadable_email_pdf_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        let email = write_email(&source.join("2023-Feb"), "20230201_Bad", "2023-02-01 00:00:00", &[]);
        std::fs::write(email.join("20230201_Bad.pdf"), b"not a pdf").unwrap();

        let err = consolidate_archive(&source, &dir.path().join("dst"), &AttachmentConverter::new(None), |_| {})
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ConversionError>().is_some());
        assert!(format!("{err:#}").contains("20230201_Bad"));
    }
}
