//! Configuration and project-root paths
//!
//! Config lives in the platform config directory (via the directories crate);
//! the project root is found by walking up from a starting directory.

use std::path::{Path, PathBuf};

/// Name used for the configuration directory
const APP_NAME: &str = "smoke-runner";

/// Environment variable overriding the configuration file location
pub const CONFIG_ENV: &str = "SMOKE_CONFIG";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/smoke-runner/`
/// - macOS: `~/Library/Application Support/smoke-runner/`
/// - Windows: `%APPDATA%\smoke-runner\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
///
/// `SMOKE_CONFIG` takes precedence over the platform location.
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Find the nearest ancestor of `start` (inclusive) that holds a `Cargo.toml`
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join("Cargo.toml").is_file())
        .map(Path::to_path_buf)
}

/// Resolve `path` against `base` unless it is already absolute
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}
