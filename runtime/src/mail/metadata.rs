//! Metadata consolidation: copy the JSON metadata of an archive tree into
//! a processed tree and gather all of it into `master_metadata.json`.

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::storage;

pub const MASTER_FILE: &str = "master_metadata.json";

/// The master file: every loadable JSON keyed by its relative path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterMetadata {
    pub generated: String,
    pub source_directory: String,
    pub destination_directory: String,
    pub total_json_files: usize,
    pub files: Map<String, Value>,
}

impl MasterMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        storage::read_json(path)
    }

    /// Every email entry of every month file, in file order.
    pub fn emails(&self) -> impl Iterator<Item = &Map<String, Value>> {
        self.files
            .values()
            .filter_map(|file| file.get("emails").and_then(Value::as_array))
            .flatten()
            .filter_map(Value::as_object)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetadataReport {
    pub found: usize,
    pub copied: usize,
    pub skipped: usize,
    pub errors: usize,
    pub master: PathBuf,
    pub loaded: usize,
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Copy every `*.json` of `src` into `dst` and write `dst/master_metadata.json`.
///
/// `dst` must already exist; it is the output of an earlier stage.
pub fn consolidate_metadata(src: &Path, dst: &Path) -> Result<MetadataReport> {
    if !src.is_dir() {
        anyhow::bail!("source directory {} not found", src.display());
    }
    if !dst.is_dir() {
        anyhow::bail!(
            "destination directory {} not found; run the repair or compress stage first",
            dst.display()
        );
    }

    let master_path = dst.join(MASTER_FILE);
    let files = storage::collect_files(src, |p| storage::has_extension(p, "json"))?;
    info!(source = %src.display(), files = files.len(), "consolidating metadata");

    let mut report = MetadataReport {
        found: files.len(),
        master: master_path.clone(),
        ..Default::default()
    };
    let mut all = Map::new();

    for path in files {
        let rel = path
            .strip_prefix(src)
            .with_context(|| format!("{} is outside {}", path.display(), src.display()))?;
        let key = rel.to_string_lossy().replace('\\', "/");

        match storage::read_json::<Value>(&path) {
            Ok(value) => {
                all.insert(key, value);
            }
            Err(e) => warn!(file = %path.display(), error = %format!("{e:#}"), "skipping unreadable metadata"),
        }

        let dest = dst.join(rel);
        if dest.exists() {
            report.skipped += 1;
            continue;
        }
        match storage::copy_file(&path, &dest) {
            Ok(_) => report.copied += 1,
            Err(e) => {
                warn!(file = %path.display(), error = %format!("{e:#}"), "copy failed");
                report.errors += 1;
            }
        }
    }

    report.loaded = all.len();
    let master = MasterMetadata {
        generated: Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        source_directory: dir_name(src),
        destination_directory: dir_name(dst),
        total_json_files: all.len(),
        files: all,
    };
    storage::write_json_pretty(&master_path, &master)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_consolidate_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("gmail_consolidated");
        let dst = dir.path().join("gmail_pdf_fixed");
        std::fs::create_dir_all(&dst).unwrap();

        let jan = json!({"month": "2023-Jan", "emails": [{"subject": "Hi", "tags": ["Work"]}]});
        storage::write_json_pretty(&src.join("2023-Jan").join("2023-Jan_consolidated.json"), &jan).unwrap();
        storage::write_json_pretty(&src.join("2023-Feb").join("2023-Feb_consolidated.json"), &json!({"emails": []}))
            .unwrap();
        std::fs::write(src.join("2023-Feb").join("broken.json"), "{nope").unwrap();
        std::fs::create_dir_all(dst.join("2023-Feb")).unwrap();
        std::fs::write(dst.join("2023-Feb").join("2023-Feb_consolidated.json"), "{}").unwrap();

        let report = consolidate_metadata(&src, &dst).unwrap();
        assert_eq!(report.found, 3);
        assert_eq!(report.copied, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.loaded, 2);
        assert!(dst.join("2023-Jan").join("2023-Jan_consolidated.json").exists());

        let master = MasterMetadata::load(&dst.join(MASTER_FILE)).unwrap();
        assert_eq!(master.source_directory, "gmail_consolidated");
        assert_eq!(master.destination_directory, "gmail_pdf_fixed");
        assert_eq!(master.total_json_files, 2);
        assert_eq!(master.files["2023-Jan/2023-Jan_consolidated.json"], jan);
        assert_eq!(master.emails().count(), 1);
    }

    #[test]
    fn test_missing_destination_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let err = consolidate_metadata(&dir.path().join("src"), &dir.path().join("dst")).unwrap_err();
        assert!(err.to_string().contains("destination directory"));
    }
}
