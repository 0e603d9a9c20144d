//! Common utilities shared across the runner

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod signal;

pub use error::{Error, Interrupt, Result};

/// Keep at most the last `max_lines` lines of `text`
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
