//! Spinner helpers using indicatif.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Spinner frames.
const SPINNER_FRAMES: &[&str] = &["◜ ", "◝ ", "◞ ", "◟ "];

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Creates a new spinner with a message. Draws to stderr so stdout stays
/// machine-readable.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();

    pb.set_style(style("{spinner:.green} {msg}").tick_strings(SPINNER_FRAMES));
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));

    pb
}

/// Finishes a spinner with an error message.
pub fn finish_error(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{prefix} {msg}"));
    pb.set_prefix("✗");
    pb.finish_with_message(msg.to_string());
}

/// Finishes a spinner and clears it from the terminal.
pub fn finish_and_clear(pb: &ProgressBar) {
    pb.finish_and_clear();
}
