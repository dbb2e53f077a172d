//! mbox export: one folder per message holding the message rendered as a
//! PDF, its attachments in their native format and a metadata JSON file.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use mailparse::{MailHeaderMap, ParsedMail};
use serde::Serialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{sanitize_filename, EmailRecord};
use crate::pdf::TextDocument;
use crate::storage;

/// Gmail system labels that are not user tags.
const SYSTEM_LABELS: [&str; 8] = [
    "Inbox", "Sent", "Draft", "Spam", "Trash", "Important", "Starred", "Chat",
];
/// Errors printed individually before the rest are suppressed.
pub const MAX_REPORTED_ERRORS: usize = 10;

fn is_separator(previous_blank: bool, line: &[u8]) -> bool {
    previous_blank && line.starts_with(b"From ")
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\n" || line == b"\r\n"
}

/// Raw messages of an mbox stream, read one at a time.
///
/// A message starts at a `From ` line at the start of the file or after a
/// blank line. The separator line itself is dropped and `>From ` escapes
/// are undone.
pub struct MboxMessages<R> {
    reader: R,
    line: Vec<u8>,
    current: Option<Vec<u8>>,
    previous_blank: bool,
}

impl<R: BufRead> MboxMessages<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            current: None,
            previous_blank: true,
        }
    }
}

impl<R: BufRead> Iterator for MboxMessages<R> {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return self.current.take().map(|msg| Ok(finish_message(msg))),
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
            let line: &[u8] = &self.line;
            if is_separator(self.previous_blank, line) {
                self.previous_blank = false;
                if let Some(msg) = self.current.replace(Vec::new()) {
                    return Some(Ok(finish_message(msg)));
                }
                continue;
            }
            self.previous_blank = is_blank(line);
            if let Some(msg) = self.current.as_mut() {
                msg.extend_from_slice(unescape_from(line).unwrap_or(line));
            }
        }
    }
}

/// Number of messages in an mbox stream, without buffering any of them.
pub fn count_messages<R: BufRead>(mut reader: R) -> std::io::Result<usize> {
    let mut line = Vec::new();
    let mut previous_blank = true;
    let mut count = 0;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(count);
        }
        if is_separator(previous_blank, &line) {
            count += 1;
            previous_blank = false;
        } else {
            previous_blank = is_blank(&line);
        }
    }
}

/// `>From ` (any number of `>`) loses one `>`.
fn unescape_from(line: &[u8]) -> Option<&[u8]> {
    let quotes = line.iter().take_while(|&&b| b == b'>').count();
    (quotes > 0 && line[quotes..].starts_with(b"From ")).then(|| &line[1..])
}

/// Drop the blank line that separates a message from the next `From `.
fn finish_message(mut msg: Vec<u8>) -> Vec<u8> {
    if msg.ends_with(b"\r\n\r\n") {
        msg.truncate(msg.len() - 2);
    } else if msg.ends_with(b"\n\n") {
        msg.truncate(msg.len() - 1);
    }
    msg
}

/// User labels from an `X-Gmail-Labels` header; `["Unfiled"]` when none.
pub fn extract_tags(labels: Option<&str>) -> Vec<String> {
    let tags: Vec<String> = labels
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter(|t| !SYSTEM_LABELS.contains(t) && !t.starts_with("Category_"))
        .map(String::from)
        .collect();
    if tags.is_empty() {
        vec!["Unfiled".to_string()]
    } else {
        tags
    }
}

/// Parse a `Date` header into the sender's wall-clock time.
///
/// RFC 2822 first, then a few looser formats; anything unparseable (or a
/// missing header) becomes the current local time.
pub fn parse_email_date(raw: Option<&str>) -> NaiveDateTime {
    let now = || Local::now().naive_local();
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return now();
    };

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return dt.naive_local();
    }
    for fmt in ["%a, %d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M:%S %z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return dt.naive_local();
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%d/%m/%Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return dt;
        }
    }
    now()
}

fn walk<'a>(part: &'a ParsedMail<'a>, out: &mut Vec<&'a ParsedMail<'a>>) {
    out.push(part);
    for sub in &part.subparts {
        walk(sub, out);
    }
}

/// Concatenation of every `text/plain` part; a single-part message
/// contributes its whole body.
pub fn extract_body(mail: &ParsedMail<'_>) -> String {
    if mail.subparts.is_empty() {
        return mail.get_body().unwrap_or_default();
    }
    let mut parts = Vec::new();
    walk(mail, &mut parts);
    parts
        .into_iter()
        .filter(|p| p.ctype.mimetype.eq_ignore_ascii_case("text/plain"))
        .filter_map(|p| p.get_body().ok())
        .collect()
}

/// Name of an attachment part, from `Content-Disposition` or `Content-Type`.
fn attachment_name(part: &ParsedMail<'_>) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

/// `(filename, bytes)` of every named part.
pub fn extract_attachments(mail: &ParsedMail<'_>) -> Vec<(String, Vec<u8>)> {
    if mail.subparts.is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    walk(mail, &mut parts);
    parts
        .into_iter()
        .filter_map(|p| {
            let name = attachment_name(p)?;
            let data = p.get_body_raw().ok().filter(|d| !d.is_empty())?;
            Some((name, data))
        })
        .collect()
}

/// A message mapped to its folder and metadata, before anything is written.
#[derive(Debug, Clone)]
pub struct ExportedMessage {
    pub month: String,
    pub folder: String,
    pub record: EmailRecord,
    pub attachments: Vec<(String, Vec<u8>)>,
}

/// Map one raw message to its export form.
pub fn map_message(raw: &[u8]) -> Result<ExportedMessage> {
    let mail = mailparse::parse_mail(raw).context("unparseable message")?;
    let header = |name: &str| mail.headers.get_first_value(name);

    let from = header("From").unwrap_or_else(|| "Unknown".to_string());
    let to = header("To").unwrap_or_else(|| "Unknown".to_string());
    let subject = header("Subject").unwrap_or_else(|| "No Subject".to_string());
    let date_raw = header("Date");
    let date = parse_email_date(date_raw.as_deref());
    let tags = extract_tags(header("X-Gmail-Labels").as_deref());

    let month = sanitize_filename(&date.format("%Y-%b").to_string());
    let short_subject: String = subject.chars().take(40).collect();
    let folder = sanitize_filename(&format!(
        "{}_{}",
        date.format("%Y%m%d"),
        sanitize_filename(&short_subject)
    ));

    let attachments: Vec<(String, Vec<u8>)> = extract_attachments(&mail)
        .into_iter()
        .map(|(name, data)| (sanitize_filename(&name), data))
        .collect();

    let record = EmailRecord {
        from,
        to,
        date: date.format("%Y-%m-%d %H:%M:%S").to_string(),
        subject,
        tags,
        body: extract_body(&mail),
        attachments: attachments.iter().map(|(n, _)| n.clone()).collect(),
        attachment_count: attachments.len(),
        email_pdf: format!("{folder}.pdf"),
        original_date_string: date_raw,
        folder: folder.clone(),
    };
    Ok(ExportedMessage {
        month,
        folder,
        record,
        attachments,
    })
}

/// The email page: header lines, a gap, then the non-blank body lines.
pub fn render_email(record: &EmailRecord) -> TextDocument {
    let mut doc = TextDocument::new();
    doc.paragraph(&format!("From: {}", record.from))
        .paragraph(&format!("To: {}", record.to))
        .paragraph(&format!("Date: {}", record.date))
        .paragraph(&format!("Subject: {}", record.subject))
        .paragraph(&format!("Tags: {}", record.tags.join(", ")))
        .space(14)
        .lines(&record.body);
    doc
}

/// Write a mapped message under `out`; returns its folder.
pub fn write_message(out: &Path, message: &ExportedMessage) -> Result<PathBuf> {
    let dir = out.join(&message.month).join(&message.folder);
    storage::ensure_dir(&dir)?;

    render_email(&message.record)
        .save(&dir.join(&message.record.email_pdf))
        .context("failed to render email PDF")?;
    for (name, data) in &message.attachments {
        let path = dir.join(name);
        std::fs::write(&path, data)
            .with_context(|| format!("failed to write attachment {}", path.display()))?;
    }
    storage::write_json_pretty(&dir.join(format!("{}.json", message.folder)), &message.record)?;
    Ok(dir)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub total: usize,
    pub processed: usize,
    pub errors: usize,
    /// The first [`MAX_REPORTED_ERRORS`] errors.
    pub error_samples: Vec<String>,
}

/// Export every message of `mbox` into `out`.
pub fn export_mbox<F>(mbox: &Path, out: &Path, mut on_progress: F) -> Result<ExportReport>
where
    F: FnMut(usize, usize),
{
    let open = || {
        std::fs::File::open(mbox)
            .map(BufReader::new)
            .with_context(|| format!("failed to open {}", mbox.display()))
    };
    let total = count_messages(open()?).with_context(|| format!("failed to read {}", mbox.display()))?;
    storage::ensure_dir(out)?;

    let mut report = ExportReport {
        total,
        ..Default::default()
    };
    info!(mbox = %mbox.display(), messages = report.total, "exporting mbox");

    for (i, raw) in MboxMessages::new(open()?).enumerate() {
        let raw = raw.with_context(|| format!("failed to read message {i} of {}", mbox.display()))?;
        let result = map_message(&raw).and_then(|m| {
            write_message(out, &m).with_context(|| format!("subject {:?}, folder {}", m.record.subject.chars().take(100).collect::<String>(), m.folder))
        });
        match result {
            Ok(_) => {
                report.processed += 1;
                if report.processed % 100 == 0 {
                    info!(processed = report.processed, total = report.total, "export progress");
                }
            }
            Err(e) => {
                report.errors += 1;
                if report.errors <= MAX_REPORTED_ERRORS {
                    let msg = format!("message {i}: {e:#}");
                    warn!("{msg}");
                    report.error_samples.push(msg);
                } else if report.errors == MAX_REPORTED_ERRORS + 1 {
                    warn!("(further errors suppressed)");
                }
            }
        }
        on_progress(i + 1, report.total);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const MBOX: &str = "From 1234@xxx Mon Jan 02 10:00:00 +0000 2023\n\
X-Gmail-Labels: Inbox,Important,Receipts,Category_Updates\n\
From: Alice <alice@example.com>\n\
To: bob@example.com\n\
Subject: Lunch: Friday?\n\
Date: Mon, 02 Jan 2023 10:15:30 -0500\n\
MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\n\
\n\
--XYZ\n\
Content-Type: text/plain; charset=utf-8\n\
\n\
Shall we meet?\n\
>From the office, 12:00.\n\
--XYZ\n\
Content-Type: text/csv; name=\"menu.csv\"\n\
Content-Disposition: attachment; filename=\"menu.csv\"\n\
Content-Transfer-Encoding: base64\n\
\n\
ZGlzaCxwcmljZQpzb3VwLDQK\n\
--XYZ--\n\
\n\
From 5678@xxx Tue Jan 03 09:00:00 +0000 2023\n\
From: carol@example.com\n\
Subject: plain\n\
\n\
Body two\n";

    fn split(data: &[u8]) -> Vec<Vec<u8>> {
        MboxMessages::new(data).map(|m| m.unwrap()).collect()
    }

    #[test]
    fn test_split_mbox() {
        let messages = split(MBOX.as_bytes());
        assert_eq!(count_messages(MBOX.as_bytes()).unwrap(), 2);
        assert_eq!(messages.len(), 2);
        let first = String::from_utf8_lossy(&messages[0]);
        assert!(first.starts_with("X-Gmail-Labels"));
        assert!(first.contains("\nFrom the office"));
        assert!(first.ends_with("--XYZ--\n"));
        assert!(String::from_utf8_lossy(&messages[1]).ends_with("Body two\n"));
    }

    #[test]
    fn test_from_inside_body_without_blank_line_is_not_a_separator() {
        let data = b"From a\nSubject: x\n\nline\nFrom here on\n";
        assert_eq!(split(data).len(), 1);
        assert_eq!(count_messages(&data[..]).unwrap(), 1);
    }

    #[test]
    fn test_extract_tags() {
        assert_eq!(extract_tags(Some("Inbox, Work ,Category_Social,Travel")), vec!["Work", "Travel"]);
        assert_eq!(extract_tags(Some("Inbox,Sent")), vec!["Unfiled"]);
        assert_eq!(extract_tags(None), vec!["Unfiled"]);
    }

    #[test]
    fn test_parse_email_date() {
        let expected = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap().and_hms_opt(10, 15, 30).unwrap();
        assert_eq!(parse_email_date(Some("Mon, 02 Jan 2023 10:15:30 -0500")), expected);
        assert_eq!(parse_email_date(Some("02 Jan 2023 10:15:30 -0500")), expected);
        assert_eq!(parse_email_date(Some("2023-01-02 10:15:30")), expected);
        assert_eq!(parse_email_date(Some("02/01/2023 10:15:30")), expected);

        let before = Local::now().naive_local();
        for garbage in ["not a date", "garbage", "Date unknown", "yesterday"] {
            let parsed = parse_email_date(Some(garbage));
            assert!(parsed >= before - chrono::Duration::seconds(1), "{garbage} parsed as {parsed}");
        }
        assert!(parse_email_date(None) >= before - chrono::Duration::seconds(1));
    }

    #[test]
    fn test_map_message() {
        let messages = split(MBOX.as_bytes());
        let m = map_message(&messages[0]).unwrap();
        assert_eq!(m.month, "2023-Jan");
        assert_eq!(m.folder, "20230102_Lunch_ Friday_");
        assert_eq!(m.record.date, "2023-01-02 10:15:30");
        assert_eq!(m.record.tags, vec!["Receipts"]);
        assert!(m.record.body.contains("Shall we meet?"));
        assert_eq!(m.record.attachments, vec!["menu.csv"]);
        assert_eq!(m.record.attachment_count, 1);
        assert_eq!(m.attachments[0].1, b"dish,price\nsoup,4\n");
        assert_eq!(m.record.email_pdf, "20230102_Lunch_ Friday_.pdf");

        let plain = map_message(&messages[1]).unwrap();
        assert_eq!(plain.record.to, "Unknown");
        assert_eq!(plain.record.tags, vec!["Unfiled"]);
        assert_eq!(plain.record.body.trim(), "Body two");
        assert!(plain.attachments.is_empty());
    }

    #[test]
    fn test_export_mbox_writes_folders() {
        let dir = tempfile::tempdir().unwrap();
        let mbox = dir.path().join("all.mbox");
        std::fs::write(&mbox, MBOX).unwrap();
        let out = dir.path().join("archive");

        let mut ticks = 0;
        let report = export_mbox(&mbox, &out, |_, _| ticks += 1).unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.processed, 2);
        assert_eq!(report.errors, 0);
        assert_eq!(ticks, 2);

        let folder = out.join("2023-Jan").join("20230102_Lunch_ Friday_");
        assert!(folder.join("20230102_Lunch_ Friday_.pdf").exists());
        assert!(folder.join("menu.csv").exists());
        let record: EmailRecord = storage::read_json(&folder.join("20230102_Lunch_ Friday_.json")).unwrap();
        assert_eq!(record.subject, "Lunch: Friday?");
        assert_eq!(record.original_date_string.as_deref(), Some("Mon, 02 Jan 2023 10:15:30 -0500"));
    }
}
