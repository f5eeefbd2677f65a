use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{msg:>12} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta})";

/// Progress bar for `len` steps; hidden when `enabled` is false
pub fn progress_bar(len: usize, message: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template(TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style.progress_chars("=> "));
    bar.set_message(message.to_string());
    bar
}
