//! Semantic colors for terminal output.
//!
//! Uses owo-colors; every helper honours `--no-color`.

use std::fmt::Display;

use owo_colors::{OwoColorize, Style};

fn paint<T: Display>(value: &T, style: Style) -> String {
    if super::no_color() {
        value.to_string()
    } else {
        value.style(style).to_string()
    }
}

/// Trait extension to apply semantic styles.
pub trait SemanticStyle {
    /// Green bold, for completed actions.
    fn success(&self) -> String;
    /// Yellow.
    fn warning(&self) -> String;
    /// Dimmed, for secondary text.
    fn muted(&self) -> String;
    /// Blue, for connection strings, ids and paths.
    fn code(&self) -> String;
}

impl<T: Display> SemanticStyle for T {
    fn success(&self) -> String {
        paint(self, Style::new().green().bold())
    }

    fn warning(&self) -> String {
        paint(self, Style::new().yellow())
    }

    fn muted(&self) -> String {
        paint(self, Style::new().dimmed())
    }

    fn code(&self) -> String {
        paint(self, Style::new().blue())
    }
}
