//! Export, consolidate, metadata and search over a small generated mbox.

use assert_json_diff::assert_json_include;
use harvest_runtime::mail::consolidate::consolidate_archive;
use harvest_runtime::mail::convert::AttachmentConverter;
use harvest_runtime::mail::export::export_mbox;
use harvest_runtime::mail::metadata::{consolidate_metadata, MASTER_FILE};
use harvest_runtime::mail::search::write_search_report;
use harvest_runtime::pdf::merge::embedded_file_names;
use harvest_runtime::pdf::text;
use serde_json::{json, Value};

const MBOX: &str = "From 1@xxx Mon Jan 02 10:00:00 +0000 2023\n\
X-Gmail-Labels: Inbox,Receipts\n\
From: Alice <alice@example.com>\n\
To: bob@example.com\n\
Subject: Lunch order\n\
Date: Mon, 02 Jan 2023 10:15:30 +0000\n\
MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"B1\"\n\
\n\
--B1\n\
Content-Type: text/plain; charset=utf-8\n\
\n\
Soup for everyone.\n\
--B1\n\
Content-Type: text/csv; name=\"menu.csv\"\n\
Content-Disposition: attachment; filename=\"menu.csv\"\n\
\n\
dish,price\n\
soup,4\n\
--B1--\n\
\n\
From 2@xxx Fri Feb 10 09:00:00 +0000 2023\n\
From: carol@example.com\n\
To: bob@example.com\n\
Subject: Quarterly numbers\n\
Date: Fri, 10 Feb 2023 09:00:00 +0000\n\
X-Gmail-Labels: Work\n\
\n\
Revenue is up.\n";

#[tokio::test]
async fn test_archive_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mbox = dir.path().join("all.mbox");
    std::fs::write(&mbox, MBOX).unwrap();
    let archive = dir.path().join("gmail_archive");
    let consolidated = dir.path().join("gmail_consolidated");
    let processed = dir.path().join("gmail_pdf_compressed");

    let export = export_mbox(&mbox, &archive, |_, _| {}).unwrap();
    assert_eq!(export.processed, 2);
    assert!(archive.join("2023-Jan").is_dir());
    assert!(archive.join("2023-Feb").is_dir());

    let converter = AttachmentConverter::new(None);
    let mut seen = Vec::new();
    let report = consolidate_archive(&archive, &consolidated, &converter, |name| seen.push(name.to_string()))
        .await
        .unwrap();
    assert_eq!(report.months, 2);
    assert_eq!(report.emails, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(seen.len(), 2);

    let lunch = consolidated.join("2023-Jan").join("20230102_Lunch order_complete.pdf");
    let doc = text::load(&lunch).unwrap();
    assert_eq!(embedded_file_names(&doc), vec!["menu.csv"]);
    let pages = text::extract_page_texts(&doc);
    assert!(pages[0].1.contains("Subject: Lunch order"));
    assert!(pages.iter().any(|(_, t)| t.contains("ATTACHMENTS")));
    assert!(pages.iter().any(|(_, t)| t.contains("soup,4")));

    std::fs::create_dir_all(&processed).unwrap();
    let meta = consolidate_metadata(&consolidated, &processed).unwrap();
    assert_eq!(meta.found, 2);
    assert_eq!(meta.copied, 2);
    assert!(processed.join("2023-Feb").join("2023-Feb_consolidated.json").exists());

    let master: Value = serde_json::from_str(&std::fs::read_to_string(processed.join(MASTER_FILE)).unwrap()).unwrap();
    assert_json_include!(
        actual: master,
        expected: json!({
            "source_directory": "gmail_consolidated",
            "destination_directory": "gmail_pdf_compressed",
            "total_json_files": 2,
            "files": {
                "2023-Jan/2023-Jan_consolidated.json": {
                    "month": "2023-Jan",
                    "total_emails": 1,
                    "emails": [{
                        "subject": "Lunch order",
                        "tags": ["Receipts"],
                        "pdf_file": "20230102_Lunch order_complete.pdf",
                        "attachments": ["menu.csv"]
                    }]
                }
            }
        })
    );

    let terms = vec!["soup".to_string(), "receipts".to_string()];
    let (path, matches) = write_search_report(&processed.join(MASTER_FILE), &terms, dir.path()).unwrap();
    assert_eq!(matches, 1);
    assert!(path.ends_with("search_return_soup_receipts.txt"));
    let report = std::fs::read_to_string(path).unwrap();
    assert!(report.starts_with("Search Results for: soup, receipts\nFound: 1 matching emails\n"));
    assert!(report.contains("Subject: Lunch order"));
    assert!(report.contains("Attachments: 1 file(s)"));

    let none = vec!["revenue".to_string(), "soup".to_string()];
    let (_, matches) = write_search_report(&processed.join(MASTER_FILE), &none, dir.path()).unwrap();
    assert_eq!(matches, 0);
}

#[tokio::test]
async fn test_unreadable_email_pdf_stops_consolidation() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("archive").join("2023-Mar").join("20230301_broken");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("20230301_broken.pdf"), b"not a pdf").unwrap();
    std::fs::write(folder.join("20230301_broken.json"), r#"{"date": "2023-03-01 00:00:00"}"#).unwrap();

    let converter = AttachmentConverter::new(None);
    let err = consolidate_archive(&dir.path().join("archive"), &dir.path().join("out"), &converter, |_| {})
        .await
        .unwrap_err();
    assert!(err
        .downcast_ref::<harvest_runtime::mail::convert::ConversionError>()
        .is_some());
    assert!(format!("{err:#}").contains("20230301_broken"));
}
