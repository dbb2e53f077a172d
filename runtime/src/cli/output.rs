//! Terminal output for the `harvest` commands.
//!
//! Human-facing lines go to stderr so stdout stays clean for `--json`.
//! The global flags are handed down through `HARVEST_*` environment
//! variables set in `main`.

use std::io::IsTerminal;

const RESET: &str = "\x1b[0m";

/// Whether stderr output should carry ANSI colors.
pub fn color_enabled() -> bool {
    // https://no-color.org/
    let disabled = ["NO_COLOR", "HARVEST_NO_COLOR"]
        .iter()
        .any(|var| std::env::var_os(var).is_some());
    !disabled && std::io::stderr().is_terminal()
}

/// Status marks printed in front of result lines.
#[derive(Debug, Clone, Copy)]
enum Mark {
    Ok,
    Fail,
    Warn,
    Info,
}

impl Mark {
    fn colored(self) -> &'static str {
        match self {
            Mark::Ok => "\x1b[32m\u{2713}\x1b[0m",
            Mark::Fail => "\x1b[31m\u{2717}\x1b[0m",
            Mark::Warn => "\x1b[33m\u{26a0}\x1b[0m",
            Mark::Info => "\x1b[34m\u{25cb}\x1b[0m",
        }
    }

    fn plain(self) -> &'static str {
        match self {
            Mark::Ok => "OK",
            Mark::Fail => "!!",
            Mark::Warn => "??",
            Mark::Info => "--",
        }
    }
}

/// Paints text when color is enabled, passes it through otherwise.
pub struct Styled {
    use_color: bool,
}

impl Default for Styled {
    fn default() -> Self {
        Self::new()
    }
}

impl Styled {
    pub fn new() -> Self {
        Self {
            use_color: color_enabled(),
        }
    }

    fn mark(&self, mark: Mark) -> &'static str {
        if self.use_color {
            mark.colored()
        } else {
            mark.plain()
        }
    }

    pub fn ok_sym(&self) -> &str {
        self.mark(Mark::Ok)
    }

    pub fn fail_sym(&self) -> &str {
        self.mark(Mark::Fail)
    }

    pub fn warn_sym(&self) -> &str {
        self.mark(Mark::Warn)
    }

    pub fn info_sym(&self) -> &str {
        self.mark(Mark::Info)
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color {
            format!("{code}{s}{RESET}")
        } else {
            s.to_string()
        }
    }

    pub fn green(&self, s: &str) -> String {
        self.paint("\x1b[32m", s)
    }

    pub fn red(&self, s: &str) -> String {
        self.paint("\x1b[31m", s)
    }

    pub fn yellow(&self, s: &str) -> String {
        self.paint("\x1b[33m", s)
    }

    pub fn bold(&self, s: &str) -> String {
        self.paint("\x1b[1m", s)
    }
}

/// `Harvest vX.Y.Z` banner at the top of a report.
pub fn print_header(s: &Styled) {
    if is_quiet() {
        return;
    }
    let version = s.paint("\x1b[2m", concat!("v", env!("CARGO_PKG_VERSION")));
    eprintln!("  {} {version}\n", s.bold("Harvest"));
}

pub fn print_section(s: &Styled, title: &str) {
    if !is_quiet() {
        eprintln!("  {}", s.bold(title));
    }
}

/// One `symbol label value` row of a report.
pub fn print_check(symbol: &str, label: &str, value: &str) {
    if !is_quiet() {
        eprintln!("    {symbol} {label:<20} {value}");
    }
}

/// Hint printed under the row above it.
pub fn print_detail(msg: &str) {
    if !is_quiet() {
        eprintln!("{:27}{msg}", "");
    }
}

/// Closing `Status:` line. Printed even with `--quiet`.
pub fn print_status(s: &Styled, status: &str, msg: &str) {
    eprintln!("\n  {}: {status} ({msg})", s.bold("Status"));
}

pub fn say(msg: &str) {
    if !is_quiet() {
        eprintln!("  {msg}");
    }
}

/// Human-readable byte count, e.g. `28.7 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];
    UNITS
        .iter()
        .find(|(_, scale)| bytes >= *scale)
        .map(|(unit, scale)| format!("{:.1} {unit}", bytes as f64 / *scale as f64))
        .unwrap_or_else(|| format!("{bytes} B"))
}

/// Cut `s` to `max` characters, marking the cut with `...`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}

pub fn is_quiet() -> bool {
    std::env::var_os("HARVEST_QUIET").is_some()
}

pub fn is_json() -> bool {
    std::env::var_os("HARVEST_JSON").is_some()
}

/// Pretty-print `value` to stdout.
pub fn print_json(value: &serde_json::Value) {
    if let Ok(s) = serde_json::to_string_pretty(value) {
        println!("{s}");
    }
}

/// Serialize a report and print it as JSON.
pub fn print_json_report<T: serde::Serialize>(value: &T) {
    match serde_json::to_value(value) {
        Ok(v) => print_json(&v),
        Err(e) => tracing::warn!(error = %e, "could not serialize report"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(30_094_131), "28.7 MB");
        assert_eq!(format_size(3 << 30), "3.0 GB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Gross Domestic Product", 10), "Gross D...");
    }

    #[test]
    fn test_marks_without_color() {
        let s = Styled { use_color: false };
        assert_eq!(s.ok_sym(), "OK");
        assert_eq!(s.warn_sym(), "??");
        assert_eq!(s.red("x"), "x");
    }

    #[test]
    fn test_marks_with_color() {
        let s = Styled { use_color: true };
        assert!(s.fail_sym().contains('\u{2717}'));
        assert_eq!(s.green("x"), "\x1b[32mx\x1b[0m");
    }
}
