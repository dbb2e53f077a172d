//! JSONL run journal: one line per completed job stage.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// A single journal line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub timestamp: String,
    pub job: String,
    pub stage: String,
    pub target: Option<String>,
    pub duration_ms: u64,
    pub status: String,
    pub items: Option<u64>,
}

/// Append-only JSONL journal.
pub struct RunJournal {
    path: PathBuf,
    file: File,
}

impl RunJournal {
    /// Open or create the journal file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open run journal: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry.
    pub fn log(&mut self, entry: &JournalEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        writeln!(self.file, "{json}")?;
        Ok(())
    }

    /// Record a finished stage.
    pub fn record(
        &mut self,
        timer: &StageTimer,
        target: Option<&str>,
        status: &str,
        items: Option<u64>,
    ) -> Result<()> {
        self.log(&JournalEntry {
            timestamp: Utc::now().to_rfc3339(),
            job: timer.job.clone(),
            stage: timer.stage.clone(),
            target: target.map(String::from),
            duration_ms: timer.started.elapsed().as_millis() as u64,
            status: status.to_string(),
            items,
        })
    }

    /// Read every parseable entry of a journal file.
    pub fn read_all(path: &Path) -> Result<Vec<JournalEntry>> {
        let file = File::open(path)
            .with_context(|| format!("failed to open run journal: {}", path.display()))?;
        Ok(BufReader::new(file)
            .lines()
            .map_while(|l| l.ok())
            .filter_map(|l| serde_json::from_str(&l).ok())
            .collect())
    }
}

/// Start time of a job stage, consumed by [`RunJournal::record`].
#[derive(Debug, Clone)]
pub struct StageTimer {
    job: String,
    stage: String,
    started: Instant,
}

impl StageTimer {
    pub fn start(job: &str, stage: &str) -> Self {
        Self {
            job: job.to_string(),
            stage: stage.to_string(),
            started: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("runs.jsonl");

        let mut journal = RunJournal::open(&path).unwrap();
        let timer = StageTimer::start("cia", "pages");
        journal.record(&timer, Some("cia rdp96"), "ok", Some(12)).unwrap();
        drop(journal);

        let mut journal = RunJournal::open(&path).unwrap();
        let timer = StageTimer::start("mail", "compress");
        journal.record(&timer, None, "failed", None).unwrap();

        let entries = RunJournal::read_all(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].job, "cia");
        assert_eq!(entries[0].items, Some(12));
        assert_eq!(entries[1].status, "failed");
        assert!(entries[1].target.is_none());
    }
}
