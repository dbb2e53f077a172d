//! Environment readiness check.
//!
//! Reports the external tools each job shells out to, the directories the
//! jobs write to, and the FRED API key. Every missing piece comes with the
//! fix to apply.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::cli::output::{self, Styled};
use crate::config::Config;
use crate::tools::{self, Tool};

/// Which jobs need a tool.
fn used_by(tool: Tool) -> &'static str {
    match tool {
        Tool::Ghostscript => "mail compress (required), mail repair",
        Tool::Tesseract | Tool::Pdftoppm => "fbi ocr",
        Tool::LibreOffice => "mail consolidate (office attachments)",
        Tool::Chromium => "--browser page source",
    }
}

struct ToolCheck {
    tool: Tool,
    path: Option<PathBuf>,
    version: Option<String>,
}

fn check_tools() -> Vec<ToolCheck> {
    Tool::ALL
        .iter()
        .map(|&tool| {
            let path = tools::locate(tool);
            let version = path.as_deref().and_then(|p| tools::version(tool, p));
            ToolCheck { tool, path, version }
        })
        .collect()
}

/// Whether a file can be created in `dir`, creating `dir` if needed.
fn is_writable(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    tempfile::NamedTempFile::new_in(dir).is_ok()
}

/// Run the doctor diagnostic.
pub async fn run(config: &Config) -> Result<()> {
    let checks = check_tools();
    if output::is_json() {
        return run_json(config, &checks);
    }

    let s = Styled::new();
    let mut ready = true;
    let mut has_warning = false;

    output::print_header(&s);

    output::print_section(&s, "System");
    output::print_check(
        s.ok_sym(),
        "OS:",
        &format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH),
    );
    eprintln!();

    output::print_section(&s, "Directories");
    if is_writable(&config.home) {
        output::print_check(s.ok_sym(), "Home:", &config.home.display().to_string());
    } else {
        output::print_check(s.fail_sym(), "Home:", &format!("{} is not writable", config.home.display()));
        output::print_detail("Fix: set HARVEST_HOME or pass --home");
        ready = false;
    }
    output::print_check(s.info_sym(), "Work dir:", &config.work_dir.display().to_string());
    output::print_check(s.info_sym(), "Output:", &config.output_dir().display().to_string());
    match get_free_disk_mb(&config.work_dir) {
        Some(free_mb) if free_mb >= 500 => {
            output::print_check(s.ok_sym(), "Disk:", &format!("{} free", output::format_size(free_mb * 1_048_576)));
        }
        Some(free_mb) => {
            output::print_check(s.warn_sym(), "Disk:", &format!("{free_mb} MB free (PDF stages need room)"));
            has_warning = true;
        }
        None => {
            output::print_check(s.warn_sym(), "Disk:", "could not determine free space");
            has_warning = true;
        }
    }
    eprintln!();

    output::print_section(&s, "Tools");
    for check in &checks {
        let label = format!("{}:", check.tool.label());
        match &check.path {
            Some(path) => {
                let version = check.version.as_deref().unwrap_or("unknown version");
                output::print_check(s.ok_sym(), &label, &format!("{version} at {}", path.display()));
            }
            None => {
                output::print_check(s.warn_sym(), &label, &format!("NOT FOUND (used by {})", used_by(check.tool)));
                output::print_detail(&format!("Fix: {}", check.tool.install_hint()));
                output::print_detail(&format!("Or set {}=/path/to/binary", check.tool.env_var()));
                has_warning = true;
            }
        }
    }
    eprintln!();

    output::print_section(&s, "Credentials");
    if config.fred_api_key.is_some() {
        output::print_check(s.ok_sym(), "FRED API key:", "set");
    } else {
        output::print_check(s.warn_sym(), "FRED API key:", "not set");
        output::print_detail("Fix: export FRED_API_KEY=... or pass --api-key to 'harvest fred'");
        has_warning = true;
    }

    if !ready {
        output::print_status(&s, &s.red("NOT READY"), "fix issues above");
        std::process::exit(1);
    } else if has_warning {
        output::print_status(&s, &s.yellow("READY"), "some jobs need the tools listed above");
    } else {
        output::print_status(&s, &s.green("READY"), "all jobs available");
    }
    Ok(())
}

fn run_json(config: &Config, checks: &[ToolCheck]) -> Result<()> {
    let tools: serde_json::Map<String, serde_json::Value> = checks
        .iter()
        .map(|c| {
            (
                c.tool.label().to_lowercase(),
                serde_json::json!({
                    "path": c.path.as_ref().map(|p| p.display().to_string()),
                    "version": c.version,
                    "env": c.tool.env_var(),
                }),
            )
        })
        .collect();

    output::print_json(&serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "home": config.home.display().to_string(),
        "home_writable": is_writable(&config.home),
        "work_dir": config.work_dir.display().to_string(),
        "output_dir": config.output_dir().display().to_string(),
        "disk_free_mb": get_free_disk_mb(&config.work_dir),
        "fred_api_key": config.fred_api_key.is_some(),
        "tools": tools,
    }));
    Ok(())
}

/// Free disk space in MB at `path`, via `df`.
fn get_free_disk_mb(path: &Path) -> Option<u64> {
    let check_path = path
        .ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    let output = Command::new("df")
        .args(["-m", &check_path.display().to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&output.stdout);
    let line = s.lines().nth(1)?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    parts.get(3)?.parse().ok()
}
