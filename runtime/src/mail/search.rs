//! Keyword search over `master_metadata.json`.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use super::metadata::MasterMetadata;
use super::sanitize_filename;

fn field<'a>(email: &'a Map<String, Value>, key: &str) -> &'a str {
    email.get(key).and_then(Value::as_str).unwrap_or("")
}

fn tags(email: &Map<String, Value>) -> Vec<&str> {
    email
        .get("tags")
        .and_then(Value::as_array)
        .map(|t| t.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Collapse whitespace runs to single spaces.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Emails whose subject, body, sender, recipients or tags contain every
/// term, ignoring case.
pub fn search_archive<'a>(master: &'a MasterMetadata, terms: &[String]) -> Vec<&'a Map<String, Value>> {
    let needles: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
    master
        .emails()
        .filter(|email| {
            let tag_text = tags(email).join(" ");
            let haystack = [
                field(email, "subject"),
                field(email, "body"),
                field(email, "from"),
                field(email, "to"),
                tag_text.as_str(),
            ]
            .join(" ")
            .to_lowercase();
            needles.iter().all(|n| haystack.contains(n.as_str()))
        })
        .collect()
}

/// `search_return_<terms joined by _>.txt`, each term made filename-safe.
pub fn report_filename(terms: &[String]) -> String {
    let parts: Vec<String> = terms.iter().map(|t| sanitize_filename(t)).collect();
    format!("search_return_{}.txt", parts.join("_").replace(' ', "_"))
}

fn or_na(value: &str) -> &str {
    if value.is_empty() {
        "N/A"
    } else {
        value
    }
}

pub fn render_report(terms: &[String], matches: &[&Map<String, Value>]) -> String {
    let rule = "=".repeat(80);
    let mut out = String::new();
    let _ = writeln!(out, "Search Results for: {}", terms.join(", "));
    let _ = writeln!(out, "Found: {} matching emails", matches.len());
    let _ = writeln!(out, "{rule}\n");

    for (i, email) in matches.iter().enumerate() {
        let _ = writeln!(out, "EMAIL {}", i + 1);
        let _ = writeln!(out, "{}", "-".repeat(40));
        let _ = writeln!(out, "From:    {}", or_na(&clean_text(field(email, "from"))));
        let _ = writeln!(out, "To:      {}", or_na(&clean_text(field(email, "to"))));
        let _ = writeln!(out, "Date:    {}", or_na(field(email, "date")));
        let _ = writeln!(out, "Subject: {}", or_na(&clean_text(field(email, "subject"))));

        let tags = tags(email);
        if !tags.is_empty() {
            let _ = writeln!(out, "Tags:    {}", tags.join(", "));
        }
        let attachments = email.get("attachments").and_then(Value::as_array).map_or(0, Vec::len);
        if attachments > 0 {
            let _ = writeln!(out, "Attachments: {attachments} file(s)");
        }

        let bar = "=".repeat(40);
        let _ = writeln!(out, "\n{bar} BODY {bar}");
        match email.get("body").and_then(Value::as_str) {
            Some(body) => out.push_str(body),
            None => out.push_str("No body content"),
        }
        let _ = writeln!(out, "\n{rule}\n");
    }
    out
}

/// Run a search and write the report into `out_dir`.
pub fn write_search_report(master_path: &Path, terms: &[String], out_dir: &Path) -> Result<(PathBuf, usize)> {
    let master = MasterMetadata::load(master_path)?;
    let matches = search_archive(&master, terms);
    let path = out_dir.join(report_filename(terms));
    std::fs::write(&path, render_report(terms, &matches))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok((path, matches.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn master() -> MasterMetadata {
        serde_json::from_value(json!({
            "generated": "2024-01-01T00:00:00",
            "source_directory": "gmail_consolidated",
            "destination_directory": "gmail_pdf_fixed",
            "total_json_files": 2,
            "files": {
                "2023-Jan/2023-Jan_consolidated.json": {
                    "emails": [
                        {"from": "Ops  Team <ops@example.com>", "to": "me@example.com", "date": "2023-01-05 08:00:00",
                         "subject": "NGC\n  rollout", "body": "Notes on the DCOD plan", "tags": ["Work"], "attachments": ["plan.pdf"]},
                        {"from": "news@example.com", "to": "me@example.com", "date": "2023-01-06 08:00:00",
                         "subject": "Newsletter", "body": "Nothing relevant", "tags": []}
                    ]
                },
                "2023-Feb/2023-Feb_consolidated.json": {
                    "emails": [
                        {"from": "a@example.com", "subject": "dcod only", "body": "", "tags": ["ngc-project"]}
                    ]
                },
                "2023-Feb/20230201_x/20230201_x.json": {"subject": "not a month file"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_search_is_case_insensitive_and() {
        let master = master();
        let terms = vec!["dcod".to_string(), "ngc".to_string()];
        let hits = search_archive(&master, &terms);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0]["date"], "2023-01-05 08:00:00");

        let none = search_archive(&master, &["dcod".to_string(), "newsletter".to_string()]);
        assert!(none.is_empty());
    }

    #[test]
    fn test_report_layout() {
        let master = master();
        let terms = vec!["dcod".to_string(), "ngc".to_string()];
        let report = render_report(&terms, &search_archive(&master, &terms));

        assert!(report.starts_with("Search Results for: dcod, ngc\nFound: 2 matching emails\n"));
        assert!(report.contains("From:    Ops Team <ops@example.com>\n"));
        assert!(report.contains("Subject: NGC rollout\n"));
        assert!(report.contains("Tags:    Work\n"));
        assert!(report.contains("Attachments: 1 file(s)\n"));
        assert!(report.contains("To:      N/A\n"));
        assert!(report.contains("Date:    N/A\n"));
        assert!(report.contains("Notes on the DCOD plan"));
        assert_eq!(report_filename(&["big deal".to_string(), "x".to_string()]), "search_return_big_deal_x.txt");

        let escaping = report_filename(&["../../etc/passwd".to_string(), "a\\b".to_string()]);
        assert!(!escaping.contains('/') && !escaping.contains('\\'));
        let components: Vec<_> = Path::new(&escaping).components().collect();
        assert!(matches!(components.as_slice(), [std::path::Component::Normal(_)]));
    }

    #[test]
    fn test_write_search_report() {
        let dir = tempfile::tempdir().unwrap();
        let master_path = dir.path().join("master_metadata.json");
        crate::storage::write_json_pretty(&master_path, &master()).unwrap();

        let (path, count) = write_search_report(&master_path, &["newsletter".to_string()], dir.path()).unwrap();
        assert_eq!(count, 1);
        assert!(path.ends_with("search_return_newsletter.txt"));
        assert!(std::fs::read_to_string(path).unwrap().contains("EMAIL 1"));
    }
}
