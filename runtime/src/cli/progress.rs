//! Progress display for long loops.
//!
//! Bars draw to stderr and are hidden under `--quiet` and `--json`.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use super::output;

fn hidden() -> bool {
    output::is_quiet() || output::is_json()
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// A counted bar for a loop over `total` items.
pub fn create_bar(total: u64, label: &str) -> ProgressBar {
    if hidden() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        style("  {prefix:<14} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .progress_chars("\u{2588}\u{2589}\u{2591}"),
    );
    bar.set_prefix(label.to_string());
    bar
}

/// A spinner for work of unknown length.
pub fn create_spinner(message: &str) -> ProgressBar {
    if hidden() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        style("  {spinner:.cyan} {msg}").tick_chars("\u{25b8}\u{25b9}\u{25b8}\u{25b9}\u{25b8}"),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Replace a bar with a completion line.
pub fn finish_done(bar: &ProgressBar, detail: &str) {
    bar.set_style(style("  {msg}"));
    bar.finish_with_message(format!("{} {detail}", output::Styled::new().ok_sym()));
}

/// Update a bar from a `(done, total)` callback.
pub fn track(bar: &ProgressBar, done: usize, total: usize) {
    if bar.length() != Some(total as u64) {
        bar.set_length(total as u64);
    }
    bar.set_position(done as u64);
}
