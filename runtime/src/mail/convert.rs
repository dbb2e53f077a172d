//! Attachment to PDF conversion.
//!
//! Routing is by extension, with magic-byte sniffing for files that have
//! none. Office formats go through LibreOffice; everything else is
//! rendered in-process. Whatever cannot be converted becomes a one-page
//! summary of the file, so every attachment contributes at least one page.

use chrono::{DateTime, Local};
use lopdf::Document;
use regex::Regex;
use scraper::{Html, Node};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::pdf::{image_document, PdfError, TextDocument};
use crate::tools::{self, Tool};

/// LibreOffice gets this long per document.
pub const LIBREOFFICE_TIMEOUT: Duration = Duration::from_secs(200);

static RTF_GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\\(?:fonttbl|colortbl|stylesheet|info|\*)[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").unwrap()
});
static RTF_CONTROL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\([a-zA-Z]+)(-?\d+)? ?|\\'([0-9a-fA-F]{2})|\\[^a-zA-Z]").unwrap());

/// Windows-1252 characters at 0x80..=0x9F; the rest of the range is Latin-1.
const CP1252_HIGH: [char; 32] = [
    '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8d}', 'Ž', '\u{8f}',
    '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\u{9d}', 'ž', 'Ÿ',
];

fn cp1252_char(byte: u8) -> char {
    match byte {
        0x80..=0x9f => CP1252_HIGH[usize::from(byte - 0x80)],
        _ => char::from(byte),
    }
}

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "text", "csv", "tsv", "json", "md", "markdown", "log", "xml", "yaml", "yml", "ini",
    "cfg", "conf", "py", "js", "ts", "java", "c", "h", "cpp", "hpp", "cs", "rb", "go", "rs",
    "sh", "bat", "ps1", "sql", "tex", "asc", "eml",
];
const CALENDAR_EXTENSIONS: &[&str] = &["ics", "ical", "icalendar", "ifb", "vcs", "vcalendar", "vcf", "vcard"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];
const OFFICE_TYPES: &[(&str, &str)] = &[
    ("doc", "application/msword"),
    ("dot", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("docm", "application/vnd.ms-word.document.macroEnabled.12"),
    ("dotx", "application/vnd.openxmlformats-officedocument.wordprocessingml.template"),
    ("odt", "application/vnd.oasis.opendocument.text"),
    ("ods", "application/vnd.oasis.opendocument.spreadsheet"),
    ("odp", "application/vnd.oasis.opendocument.presentation"),
    ("xps", "application/vnd.ms-xpsdocument"),
    ("vsd", "application/vnd.visio"),
    ("vsdx", "application/vnd.visio"),
    ("xls", "application/vnd.ms-excel"),
    ("xlt", "application/vnd.ms-excel"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("xlsm", "application/vnd.ms-excel.sheet.macroEnabled.12"),
    ("xlsb", "application/vnd.ms-excel.sheet.binary.macroEnabled.12"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("pps", "application/vnd.ms-powerpoint"),
    ("pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    ("ppsx", "application/vnd.openxmlformats-officedocument.presentationml.slideshow"),
    ("pptm", "application/vnd.ms-powerpoint.presentation.macroEnabled.12"),
];

/// Errors that stop consolidation.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("could not read email PDF {}: {source}", path.display())]
    EmailPdf {
        path: PathBuf,
        #[source]
        source: PdfError,
    },
    #[error("could not add the pages of {name}: {source}")]
    Pages {
        name: String,
        #[source]
        source: PdfError,
    },
    #[error("could not write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: PdfError,
    },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How an attachment is turned into pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Pdf,
    Image,
    Text,
    Html,
    Rtf,
    Calendar,
    Office,
    Unknown,
}

impl AttachmentKind {
    /// Kind by file extension.
    pub fn from_name(name: &str) -> Self {
        let Some(ext) = extension(name) else {
            return AttachmentKind::Unknown;
        };
        let ext = ext.as_str();
        match ext {
            "pdf" => AttachmentKind::Pdf,
            "htm" | "html" | "xhtml" => AttachmentKind::Html,
            "rtf" => AttachmentKind::Rtf,
            _ if IMAGE_EXTENSIONS.contains(&ext) => AttachmentKind::Image,
            _ if CALENDAR_EXTENSIONS.contains(&ext) => AttachmentKind::Calendar,
            _ if TEXT_EXTENSIONS.contains(&ext) => AttachmentKind::Text,
            _ if OFFICE_TYPES.iter().any(|(e, _)| *e == ext) => AttachmentKind::Office,
            _ => AttachmentKind::Unknown,
        }
    }

    /// Kind by magic bytes: PDF, PNG, JPEG and GIF.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(AttachmentKind::Pdf)
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n")
            || bytes.starts_with(b"\xff\xd8\xff")
            || bytes.starts_with(b"GIF87a")
            || bytes.starts_with(b"GIF89a")
        {
            Some(AttachmentKind::Image)
        } else {
            None
        }
    }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
}

/// MIME type shown on summary pages.
pub fn describe_type(name: &str, bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"%PDF") {
        return "application/pdf";
    }
    if bytes.starts_with(b"\x89PNG") {
        return "image/png";
    }
    if bytes.starts_with(b"\xff\xd8\xff") {
        return "image/jpeg";
    }
    if bytes.starts_with(b"GIF8") {
        return "image/gif";
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }
    let ext = extension(name).unwrap_or_default();
    OFFICE_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or("application/octet-stream")
}

/// Text when `bytes` decode as UTF-8 without binary control characters.
pub fn as_text(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    let binary = text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c'));
    (!binary).then(|| text.to_string())
}

/// Visible text of an HTML document, one line per text node.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut lines = Vec::new();
    for node in doc.tree.nodes() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            matches!(a.value(), Node::Element(el) if matches!(el.name(), "script" | "style" | "head"))
        });
        if hidden {
            continue;
        }
        let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

/// Plain text of an RTF document: control words and groups dropped,
/// `\par` and `\line` kept as line breaks.
pub fn rtf_to_text(rtf: &str) -> String {
    let rtf = RTF_GROUP_RE.replace_all(rtf, "");
    let text = RTF_CONTROL_RE.replace_all(&rtf, |caps: &regex::Captures<'_>| {
        match caps.get(1).map(|m| m.as_str()) {
            Some("par") | Some("line") => "\n".to_string(),
            Some("tab") => "\t".to_string(),
            _ if caps.get(3).is_some() => caps
                .get(3)
                .and_then(|hex| u8::from_str_radix(hex.as_str(), 16).ok())
                .map(|b| cp1252_char(b).to_string())
                .unwrap_or_default(),
            _ => match caps.get(0).map(|m| m.as_str()) {
                Some(r"\\") => "\\".to_string(),
                Some(r"\{") => "{".to_string(),
                Some(r"\}") => "}".to_string(),
                _ => String::new(),
            },
        }
    });
    text.replace(['{', '}'], "")
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Unfold continuation lines of an iCalendar/vCard file.
pub fn unfold_calendar(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(' ').or_else(|| line.strip_prefix('\t')) {
            out.push_str(rest);
        } else {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(line);
        }
    }
    out
}

/// The page used when an attachment cannot be converted.
pub fn summary_page(name: &str, bytes: &[u8], modified: Option<DateTime<Local>>) -> TextDocument {
    let mut doc = TextDocument::new();
    doc.heading(&format!("FILE: {name}"), 9)
        .space(7)
        .paragraph(&format!("Type: {}", describe_type(name, bytes)))
        .paragraph(&format!("Size: {:.1} KB", bytes.len() as f64 / 1024.0));
    if let Some(modified) = modified {
        doc.paragraph(&format!("Modified: {}", modified.format("%Y-%m-%d %H:%M:%S")));
    }
    doc.space(14)
        .paragraph("This file could not be automatically converted to PDF.")
        .paragraph("The original file is embedded below.");
    doc
}

fn text_pages(title: &str, text: &str) -> TextDocument {
    let mut doc = TextDocument::new();
    doc.heading(title, 10).space(7).lines(text);
    doc
}

/// Pages produced for one attachment.
#[derive(Debug)]
pub struct Converted {
    pub document: Document,
    pub kind: AttachmentKind,
    /// The summary page stands in for the content.
    pub summary_only: bool,
}

/// Converts attachments, using LibreOffice when it is installed.
#[derive(Debug, Clone)]
pub struct AttachmentConverter {
    soffice: Option<PathBuf>,
    timeout: Duration,
}

impl AttachmentConverter {
    pub fn new(soffice: Option<PathBuf>) -> Self {
        Self {
            soffice,
            timeout: LIBREOFFICE_TIMEOUT,
        }
    }

    /// Locate LibreOffice; Office files become summary pages without it.
    pub fn detect() -> Self {
        Self::new(tools::locate(Tool::LibreOffice))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_office(&self) -> bool {
        self.soffice.is_some()
    }

    /// Convert `path`; `scratch` receives intermediate files.
    pub async fn convert(&self, path: &Path, scratch: &Path) -> std::io::Result<Converted> {
        let name = path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("attachment")
            .to_string();
        let bytes = std::fs::read(path)?;

        let mut kind = AttachmentKind::from_name(&name);
        if kind == AttachmentKind::Unknown {
            kind = AttachmentKind::sniff(&bytes).unwrap_or(AttachmentKind::Unknown);
        }

        let result = match kind {
            AttachmentKind::Pdf => Document::load_mem(&bytes).map_err(PdfError::from).and_then(|doc| {
                if doc.get_pages().is_empty() {
                    Err(PdfError::NoPages)
                } else {
                    Ok(doc)
                }
            }),
            AttachmentKind::Image => image_document(&bytes),
            AttachmentKind::Text => {
                text_pages(&format!("Text File: {name}"), &String::from_utf8_lossy(&bytes)).to_document()
            }
            AttachmentKind::Html => {
                text_pages(&format!("HTML File: {name}"), &html_to_text(&String::from_utf8_lossy(&bytes)))
                    .to_document()
            }
            AttachmentKind::Rtf => {
                text_pages(&format!("RTF File: {name}"), &rtf_to_text(&String::from_utf8_lossy(&bytes)))
                    .to_document()
            }
            AttachmentKind::Calendar => {
                let ext = extension(&name).unwrap_or_default().to_uppercase();
                let mut doc = TextDocument::new();
                doc.heading(&format!("Calendar/Contact File: {name}"), 9)
                    .paragraph(&format!("File Type: .{ext}"))
                    .space(7)
                    .lines(&unfold_calendar(&String::from_utf8_lossy(&bytes)));
                doc.to_document()
            }
            AttachmentKind::Office => self.convert_office(path, scratch).await,
            AttachmentKind::Unknown => match as_text(&bytes) {
                Some(text) => text_pages(&format!("File: {name}"), &text).to_document(),
                None => Err(PdfError::NoPages),
            },
        };

        match result {
            Ok(document) => Ok(Converted {
                document,
                kind,
                summary_only: false,
            }),
            Err(e) => {
                if kind != AttachmentKind::Unknown {
                    warn!(file = %name, ?kind, error = %e, "conversion failed, using summary page");
                }
                let modified = std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .map(DateTime::<Local>::from);
                let document = summary_page(&name, &bytes, modified)
                    .to_document()
                    .map_err(std::io::Error::other)?;
                Ok(Converted {
                    document,
                    kind,
                    summary_only: true,
                })
            }
        }
    }

    async fn convert_office(&self, path: &Path, scratch: &Path) -> Result<Document, PdfError> {
        let soffice = self.soffice.as_deref().ok_or_else(|| {
            PdfError::Tool(tools::ToolError::NotFound {
                tool: Tool::LibreOffice,
                hint: Tool::LibreOffice.install_hint(),
                env: Tool::LibreOffice.env_var(),
            })
        })?;

        let out_dir = scratch.join("office");
        let profile = scratch.join("lo_profile");
        for dir in [&out_dir, &profile] {
            std::fs::create_dir_all(dir).map_err(|source| PdfError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        // A private profile lets conversions run while a desktop LibreOffice is open.
        let profile_url = url::Url::from_directory_path(&profile)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("file://{}", profile.display()));
        let env_arg = format!("-env:UserInstallation={profile_url}");

        let args = [
            OsStr::new(&env_arg),
            OsStr::new("--headless"),
            OsStr::new("--convert-to"),
            OsStr::new("pdf"),
            OsStr::new("--outdir"),
            out_dir.as_os_str(),
            path.as_os_str(),
        ];
        let outcome = tools::run_with_timeout(soffice, args, self.timeout).await?;
        if !outcome.success {
            return Err(PdfError::Conversion(format!(
                "LibreOffice could not convert {}: {}",
                path.display(),
                outcome.error_summary()
            )));
        }

        let stem = path.file_stem().unwrap_or_default().to_string_lossy();
        let produced = out_dir.join(format!("{stem}.pdf"));
        debug!(output = %produced.display(), elapsed = ?outcome.elapsed, "LibreOffice conversion done");
        let doc = Document::load(&produced)?;
        if doc.get_pages().is_empty() {
            return Err(PdfError::NoPages);
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_name() {
        assert_eq!(AttachmentKind::from_name("a.PDF"), AttachmentKind::Pdf);
        assert_eq!(AttachmentKind::from_name("photo.jpeg"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::from_name("data.csv"), AttachmentKind::Text);
        assert_eq!(AttachmentKind::from_name("page.html"), AttachmentKind::Html);
        assert_eq!(AttachmentKind::from_name("memo.rtf"), AttachmentKind::Rtf);
        assert_eq!(AttachmentKind::from_name("invite.ics"), AttachmentKind::Calendar);
        assert_eq!(AttachmentKind::from_name("card.vcf"), AttachmentKind::Calendar);
        assert_eq!(AttachmentKind::from_name("report.docx"), AttachmentKind::Office);
        assert_eq!(AttachmentKind::from_name("noext"), AttachmentKind::Unknown);
        assert_eq!(AttachmentKind::from_name("archive.zip"), AttachmentKind::Unknown);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(AttachmentKind::sniff(b"%PDF-1.7"), Some(AttachmentKind::Pdf));
        assert_eq!(AttachmentKind::sniff(b"\x89PNG\r\n\x1a\n...."), Some(AttachmentKind::Image));
        assert_eq!(AttachmentKind::sniff(b"\xff\xd8\xff\xe0"), Some(AttachmentKind::Image));
        assert_eq!(AttachmentKind::sniff(b"GIF89a"), Some(AttachmentKind::Image));
        assert_eq!(AttachmentKind::sniff(b"hello"), None);
    }

    #[test]
    fn test_html_to_text_skips_scripts() {
        let html = "<html><head><title>T</title><style>p{}</style></head>\
                    <body><p>Hello   <b>world</b></p><script>var x;</script><div>Bye</div></body></html>";
        assert_eq!(html_to_text(html), "Hello\nworld\nBye");
    }

    #[test]
    fn test_rtf_to_text() {
        let rtf = r"{\rtf1\ansi{\fonttbl\f0\fswiss Helvetica;}\f0\pard Hello \b bold\b0  text\par Second line caf\'e9 \'93quoted\'94\par}";
        let text = rtf_to_text(rtf);
        assert_eq!(text, "Hello bold text\nSecond line café “quoted”");
        assert!(!text.contains('\\'));
    }

    #[test]
    fn test_unfold_calendar() {
        let ics = "BEGIN:VEVENT\nSUMMARY:Long\n  title\nEND:VEVENT";
        assert_eq!(unfold_calendar(ics), "BEGIN:VEVENT\nSUMMARY:Long title\nEND:VEVENT");
    }

    #[test]
    fn test_as_text() {
        assert_eq!(as_text(b"plain\ttext\n").as_deref(), Some("plain\ttext\n"));
        assert!(as_text(b"\x00\x01binary").is_none());
        assert!(as_text(&[0xff, 0xfe]).is_none());
    }

    #[tokio::test]
    async fn test_convert_routes_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let converter = AttachmentConverter::new(None);

        let csv = dir.path().join("menu.csv");
        std::fs::write(&csv, "dish,price\nsoup,4\n").unwrap();
        let converted = converter.convert(&csv, dir.path()).await.unwrap();
        assert_eq!(converted.kind, AttachmentKind::Text);
        assert!(!converted.summary_only);
        assert!(converted.document.extract_text(&[1]).unwrap().contains("soup,4"));

        let docx = dir.path().join("report.docx");
        std::fs::write(&docx, b"PK\x03\x04not really").unwrap();
        let converted = converter.convert(&docx, dir.path()).await.unwrap();
        assert_eq!(converted.kind, AttachmentKind::Office);
        assert!(converted.summary_only);
        let page = converted.document.extract_text(&[1]).unwrap();
        assert!(page.contains("could not be automatically converted"));

        let blob = dir.path().join("blob");
        std::fs::write(&blob, [0u8, 1, 2, 3]).unwrap();
        assert!(converter.convert(&blob, dir.path()).await.unwrap().summary_only);

        let broken_pdf = dir.path().join("broken.pdf");
        std::fs::write(&broken_pdf, b"%PDF-1.4 garbage").unwrap();
        assert!(converter.convert(&broken_pdf, dir.path()).await.unwrap().summary_only);
    }
}
