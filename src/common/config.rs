//! Configuration file handling

use serde::Deserialize;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Build tool settings
    #[serde(default)]
    pub build: BuildSettings,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Readiness polling settings
    #[serde(default)]
    pub readiness: ReadinessSettings,
}

/// Build tool settings
#[derive(Debug, Deserialize)]
pub struct BuildSettings {
    /// Program used to build cargo targets
    #[serde(default = "default_build_program")]
    pub program: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            program: default_build_program(),
        }
    }
}

fn default_build_program() -> String {
    "cargo".to_string()
}

/// Timeout settings
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Maximum time to wait for the server to become ready
    #[serde(default = "default_readiness_ceiling")]
    pub readiness_ceiling_secs: u64,

    /// Upper bound for a single client invocation
    #[serde(default = "default_invocation")]
    pub invocation_secs: u64,

    /// Time the server gets to exit after SIGTERM before it is killed
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            readiness_ceiling_secs: default_readiness_ceiling(),
            invocation_secs: default_invocation(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

fn default_readiness_ceiling() -> u64 {
    3
}
fn default_invocation() -> u64 {
    60
}
fn default_shutdown_grace() -> u64 {
    2000
}

/// Backoff settings for readiness probes
#[derive(Debug, Deserialize)]
pub struct ReadinessSettings {
    /// Delay before the second probe attempt
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,

    /// Cap on the delay between probe attempts
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
        }
    }
}

fn default_initial_interval() -> u64 {
    50
}
fn default_max_interval() -> u64 {
    500
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                return Self::parse(&content);
            }
        }
        Ok(Self::default())
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every run fail or spin
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("timeouts.readiness_ceiling_secs", self.timeouts.readiness_ceiling_secs),
            ("timeouts.invocation_secs", self.timeouts.invocation_secs),
            ("readiness.initial_interval_ms", self.readiness.initial_interval_ms),
            ("readiness.max_interval_ms", self.readiness.max_interval_ms),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);

        if let Some((key, _)) = zero {
            return Err(super::Error::ConfigParse(format!("{} must be positive", key)));
        }
        if self.build.program.trim().is_empty() {
            return Err(super::Error::ConfigParse(
                "build.program must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.shutdown_grace_ms)
    }
}
