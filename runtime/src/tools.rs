//! External tool discovery and execution.
//!
//! Ghostscript, Tesseract, pdftoppm, LibreOffice and Chromium are located
//! in the same order for every tool: an explicit `HARVEST_<TOOL>_PATH`
//! environment variable, the PATH (via `which`), then well-known install
//! locations.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// External programs the jobs shell out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Ghostscript,
    Tesseract,
    Pdftoppm,
    LibreOffice,
    Chromium,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::Ghostscript,
        Tool::Tesseract,
        Tool::Pdftoppm,
        Tool::LibreOffice,
        Tool::Chromium,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Tool::Ghostscript => "Ghostscript",
            Tool::Tesseract => "Tesseract",
            Tool::Pdftoppm => "pdftoppm",
            Tool::LibreOffice => "LibreOffice",
            Tool::Chromium => "Chromium",
        }
    }

    /// Environment variable that pins the executable path.
    pub fn env_var(self) -> &'static str {
        match self {
            Tool::Ghostscript => "HARVEST_GS_PATH",
            Tool::Tesseract => "HARVEST_TESSERACT_PATH",
            Tool::Pdftoppm => "HARVEST_PDFTOPPM_PATH",
            Tool::LibreOffice => "HARVEST_SOFFICE_PATH",
            Tool::Chromium => "HARVEST_CHROMIUM_PATH",
        }
    }

    fn binary_names(self) -> &'static [&'static str] {
        match self {
            Tool::Ghostscript => &["gs", "gswin64c", "gswin32c"],
            Tool::Tesseract => &["tesseract"],
            Tool::Pdftoppm => &["pdftoppm"],
            Tool::LibreOffice => &["soffice", "libreoffice"],
            Tool::Chromium => &[
                "chromium",
                "chromium-browser",
                "google-chrome",
                "google-chrome-stable",
                "chrome",
            ],
        }
    }

    fn well_known_paths(self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = match self {
            Tool::Ghostscript => vec![
                "/usr/local/bin/gs".into(),
                "/opt/homebrew/bin/gs".into(),
            ],
            Tool::Tesseract => vec![
                "/usr/local/bin/tesseract".into(),
                "/opt/homebrew/bin/tesseract".into(),
                r"C:\Program Files\Tesseract-OCR\tesseract.exe".into(),
            ],
            Tool::Pdftoppm => vec![
                "/usr/local/bin/pdftoppm".into(),
                "/opt/homebrew/bin/pdftoppm".into(),
            ],
            Tool::LibreOffice => vec![
                "/Applications/LibreOffice.app/Contents/MacOS/soffice".into(),
                "/usr/lib/libreoffice/program/soffice".into(),
                r"C:\Program Files\LibreOffice\program\soffice.exe".into(),
            ],
            Tool::Chromium => vec![
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome".into(),
                "/Applications/Chromium.app/Contents/MacOS/Chromium".into(),
                r"C:\Program Files\Google\Chrome\Application\chrome.exe".into(),
            ],
        };
        if self == Tool::Ghostscript {
            paths.extend(windows_ghostscript_installs());
        }
        paths
    }

    /// Install hint printed by `doctor` and by hard failures.
    pub fn install_hint(self) -> &'static str {
        match self {
            Tool::Ghostscript => "install Ghostscript (apt install ghostscript / brew install ghostscript)",
            Tool::Tesseract => "install Tesseract (apt install tesseract-ocr / brew install tesseract)",
            Tool::Pdftoppm => "install Poppler (apt install poppler-utils / brew install poppler)",
            Tool::LibreOffice => "install LibreOffice (apt install libreoffice / brew install --cask libreoffice)",
            Tool::Chromium => "install Chromium or Google Chrome",
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors from locating or running external tools.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{tool} not found; {hint} or set {env}")]
    NotFound {
        tool: Tool,
        hint: &'static str,
        env: &'static str,
    },
    #[error("failed to start {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Locate a tool, or `None` when it is not installed.
pub fn locate(tool: Tool) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(tool.env_var()) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
        warn!(tool = %tool, path = %p, "{} points at a missing file", tool.env_var());
    }

    for name in tool.binary_names() {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    tool.well_known_paths().into_iter().find(|p| p.exists())
}

/// Locate a tool or fail with an install hint.
pub fn require(tool: Tool) -> Result<PathBuf, ToolError> {
    locate(tool).ok_or(ToolError::NotFound {
        tool,
        hint: tool.install_hint(),
        env: tool.env_var(),
    })
}

/// First line of `<tool> --version`, if it runs.
pub fn version(tool: Tool, path: &Path) -> Option<String> {
    let flag = match tool {
        Tool::Pdftoppm => "-v",
        _ => "--version",
    };
    let output = Command::new(path)
        .arg(flag)
        .stdin(Stdio::null())
        .output()
        .ok()?;
    // pdftoppm and tesseract print their version on stderr.
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).to_string()
    };
    let line = text.lines().next()?.trim().to_string();
    (!line.is_empty()).then_some(line)
}

/// Result of running a tool to completion (or to its deadline).
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ToolOutcome {
    /// Last non-empty stderr line, for error messages.
    pub fn error_summary(&self) -> String {
        if self.timed_out {
            return format!("timed out after {}s", self.elapsed.as_secs());
        }
        self.stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| format!("exit status {:?}", self.status))
    }
}

/// Run `program args...` and wait at most `timeout`.
///
/// The child is killed when the deadline passes; that is reported through
/// `timed_out`, not as an error.
pub async fn run_with_timeout<I, S>(
    program: &Path,
    args: I,
    timeout: Duration,
) -> Result<ToolOutcome, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let start = Instant::now();
    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ToolOutcome {
            success: output.status.success(),
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
            elapsed: start.elapsed(),
        }),
        Ok(Err(source)) => Err(ToolError::Spawn {
            program: program.to_path_buf(),
            source,
        }),
        Err(_) => {
            // Dropping the wait future drops the child, which kills it.
            debug!(program = %program.display(), "tool timed out");
            Ok(ToolOutcome {
                success: false,
                status: None,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: true,
                elapsed: start.elapsed(),
            })
        }
    }
}

fn windows_ghostscript_installs() -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in [r"C:\Program Files\gs", r"C:\Program Files (x86)\gs"] {
        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        for entry in entries.flatten() {
            for exe in ["gswin64c.exe", "gswin32c.exe"] {
                let candidate = entry.path().join("bin").join(exe);
                if candidate.exists() {
                    found.push(candidate);
                }
            }
        }
    }
    found.sort();
    found.reverse();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_vars_are_distinct() {
        let mut vars: Vec<_> = Tool::ALL.iter().map(|t| t.env_var()).collect();
        vars.sort();
        vars.dedup();
        assert_eq!(vars.len(), Tool::ALL.len());
    }

    #[test]
    fn test_require_reports_hint() {
        let err = ToolError::NotFound {
            tool: Tool::Ghostscript,
            hint: Tool::Ghostscript.install_hint(),
            env: Tool::Ghostscript.env_var(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Ghostscript not found"));
        assert!(msg.contains("HARVEST_GS_PATH"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_timeout_captures_output() {
        let outcome = run_with_timeout(Path::new("sh"), ["-c", "echo hello; echo oops >&2"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.stdout.trim(), "hello");
        assert_eq!(outcome.error_summary(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_timeout_kills_slow_process() {
        let outcome = run_with_timeout(Path::new("sleep"), ["5"], Duration::from_millis(100))
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.success);
        assert!(outcome.elapsed < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = run_with_timeout(
            Path::new("/definitely/not/a/real/tool"),
            Vec::<String>::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
