//! Error types for the smoke runner
//!
//! Every failure is fatal to a run. The variants keep the failing step
//! distinguishable so the report and the process exit code can say which
//! step broke.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// External termination request that interrupted a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// SIGINT / Ctrl-C
    CtrlC,
    /// SIGTERM
    Terminate,
}

impl std::fmt::Display for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interrupt::CtrlC => write!(f, "SIGINT"),
            Interrupt::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Main error type for the smoke runner
#[derive(Error, Debug)]
pub enum Error {
    // === Build Errors ===
    #[error("Build failed: '{command}' exited with {}", describe_code(*code))]
    Build { command: String, code: Option<i32> },

    #[error("Build tool '{program}' could not be started: {reason}")]
    BuildToolUnavailable { program: String, reason: String },

    // === Server Errors ===
    #[error("Failed to launch '{target}': {reason}")]
    Launch { target: String, reason: String },

    #[error("Server '{target}' exited with {} before it became ready", describe_code(*code))]
    ServerExited { target: String, code: Option<i32> },

    #[error("Server not ready after {0} seconds ({1})")]
    ReadinessTimeout(u64, String),

    // === Query Errors ===
    #[error("{name} failed: client exited with {}{}", describe_code(*code), format_tail(stderr_tail))]
    Invocation {
        name: String,
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("{name} could not be started: {reason}")]
    InvocationSpawn { name: String, reason: String },

    #[error("{name} timed out after {secs} seconds")]
    InvocationTimeout { name: String, secs: u64 },

    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    // === Interrupts ===
    #[error("Interrupted by {0}")]
    Interrupted(Interrupt),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid test plan: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn format_tail(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("\n{}", tail)
    }
}

impl Error {
    /// Create a launch error
    pub fn launch(target: &str, reason: impl Into<String>) -> Self {
        Self::Launch {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invocation spawn error
    pub fn invocation_spawn(name: &str, reason: impl Into<String>) -> Self {
        Self::InvocationSpawn {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for reports
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Build { .. } | Error::BuildToolUnavailable { .. } => "BUILD_ERROR",
            Error::Launch { .. } | Error::ServerExited { .. } => "LAUNCH_ERROR",
            Error::ReadinessTimeout(..) => "READINESS_TIMEOUT",
            Error::Invocation { .. } | Error::InvocationSpawn { .. } => "INVOCATION_ERROR",
            Error::InvocationTimeout { .. } => "INVOCATION_TIMEOUT",
            Error::TestAssertion(_) => "ASSERTION_FAILED",
            Error::Interrupted(_) => "SIGNAL_INTERRUPT",
            Error::Config(_) | Error::ConfigParse(_) | Error::Yaml(_) => "CONFIG_ERROR",
            Error::FileRead { .. } | Error::Io(_) => "IO_ERROR",
            Error::Json(_) | Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Process exit status the runner reports for this error
    ///
    /// Build and invocation failures propagate the failing child's exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Build { code, .. } | Error::Invocation { code, .. } => match code {
                Some(code) if *code != 0 => *code,
                _ => 1,
            },
            Error::InvocationTimeout { .. } => 124,
            Error::Interrupted(Interrupt::CtrlC) => 130,
            Error::Interrupted(Interrupt::Terminate) => 143,
            Error::Config(_) | Error::ConfigParse(_) | Error::Yaml(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_propagates_tool_exit_code() {
        let err = Error::Build {
            command: "cargo build".to_string(),
            code: Some(101),
        };
        assert_eq!(err.exit_code(), 101);
        assert_eq!(err.kind(), "BUILD_ERROR");
    }

    #[test]
    fn test_signal_killed_child_maps_to_generic_failure() {
        let err = Error::Invocation {
            name: "query 1".to_string(),
            code: None,
            stderr_tail: String::new(),
        };
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_interrupt_exit_codes() {
        assert_eq!(Error::Interrupted(Interrupt::CtrlC).exit_code(), 130);
        assert_eq!(Error::Interrupted(Interrupt::Terminate).exit_code(), 143);
        assert_eq!(
            Error::Interrupted(Interrupt::CtrlC).to_string(),
            "Interrupted by SIGINT"
        );
    }

    #[test]
    fn test_invocation_message_includes_stderr_tail() {
        let err = Error::Invocation {
            name: "users".to_string(),
            code: Some(3),
            stderr_tail: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("users failed: client exited with exit code 3"));
        assert!(msg.ends_with("connection refused"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_config_errors_use_usage_exit_code() {
        assert_eq!(Error::Config("bad".into()).exit_code(), 2);
        assert_eq!(Error::Config("bad".into()).kind(), "CONFIG_ERROR");
    }
}
