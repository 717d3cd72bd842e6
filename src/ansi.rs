//! ANSI styling for labels and status lines.
//!
//! All escape sequences go through a `Palette` so that no-color mode can turn
//! every one of them off in a single place.

use crossterm::style::{Color, Stylize};

/// 256-color codes handed out to processes in order.
pub const LABEL_COLORS: [u8; 10] = [2, 3, 4, 5, 6, 42, 130, 103, 129, 108];

/// Returns the label color for the process at `index`.
pub fn label_color(index: usize) -> u8 {
    LABEL_COLORS[index % LABEL_COLORS.len()]
}

/// Applies or suppresses ANSI styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Colors stay on unless `no_color` is set or `NO_COLOR` is non-empty.
    pub fn from_env(no_color: bool) -> Self {
        let env_disabled = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
        Self::new(!no_color && !env_disabled)
    }

    pub fn red(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        text.with(Color::DarkRed).to_string()
    }

    pub fn dim(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        text.dim().to_string()
    }

    pub fn bold(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        text.bold().to_string()
    }

    /// Wraps a process label in its 256-color code.
    pub fn label(&self, text: &str, color: u8) -> String {
        if !self.enabled {
            return text.to_string();
        }
        text.with(Color::AnsiValue(color)).to_string()
    }
}
