//! Cosmetic progress reporting (§7: "a textual progress summary per
//! stage"). Kept deliberately thin — `tracing::info!` already carries the
//! structured counts the Coordinator logs; this just wraps an `indicatif`
//! spinner for long-running stages when stdout is a terminal.

use indicatif::{ProgressBar, ProgressStyle};

pub fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("static template is valid")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(100));
    bar.set_message(message.to_string());
    bar
}

pub fn finish(bar: &ProgressBar, message: impl Into<String>) {
    bar.finish_with_message(message.into());
}
