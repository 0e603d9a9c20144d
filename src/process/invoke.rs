//! Synchronous client invocations
//!
//! Runs a program to completion while echoing its output line by line and
//! capturing it for assertions. Every invocation is bounded by a timeout.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::common::{Error, Result};

/// One program invocation
#[derive(Debug, Clone)]
pub struct InvokeSpec<'a> {
    /// Display name used in logs and errors
    pub name: &'a str,
    pub program: &'a Path,
    pub args: Vec<&'a str>,
    pub env: Vec<(&'a str, &'a str)>,
    pub cwd: &'a Path,
    pub timeout: Duration,
    /// Echo output lines to our stdout/stderr as they arrive
    pub echo: bool,
}

/// Captured result of a completed invocation
#[derive(Debug)]
pub struct Invocation {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl Invocation {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Which of our streams a child stream is echoed to
#[derive(Clone, Copy)]
enum Echo {
    Off,
    Stdout,
    Stderr,
}

/// Run a program to completion
///
/// A non-zero exit is not an error here; callers decide what it means. The
/// child is killed if the timeout elapses or the returned future is dropped.
pub async fn invoke(spec: InvokeSpec<'_>) -> Result<Invocation> {
    let started = Instant::now();

    let mut child = Command::new(spec.program)
        .args(&spec.args)
        .envs(spec.env.iter().copied())
        .current_dir(spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::invocation_spawn(spec.name, format!("{}: {}", spec.program.display(), e)))?;

    tracing::debug!(name = spec.name, pid = ?child.id(), "Invocation started");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("Failed to get client stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("Failed to get client stderr".to_string()))?;

    let (out_echo, err_echo) = if spec.echo {
        (Echo::Stdout, Echo::Stderr)
    } else {
        (Echo::Off, Echo::Off)
    };

    let run = async {
        let (stdout, stderr, status) = tokio::join!(
            collect_lines(stdout, out_echo),
            collect_lines(stderr, err_echo),
            child.wait()
        );
        Ok::<_, std::io::Error>((stdout?, stderr?, status?))
    };

    let outcome = tokio::time::timeout(spec.timeout, run).await;
    let (stdout, stderr, status) = match outcome {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(name = spec.name, "Invocation timed out, killing");
            let _ = child.kill().await;
            return Err(Error::InvocationTimeout {
                name: spec.name.to_string(),
                secs: spec.timeout.as_secs(),
            });
        }
    };

    let duration = started.elapsed();
    tracing::debug!(
        name = spec.name,
        code = ?status.code(),
        elapsed_ms = duration.as_millis() as u64,
        "Invocation finished"
    );

    Ok(Invocation {
        status,
        stdout,
        stderr,
        duration,
    })
}

/// Read a stream to EOF line by line, echoing each line as configured
async fn collect_lines<R: AsyncRead + Unpin>(reader: R, echo: Echo) -> std::io::Result<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut captured = String::new();
    while let Some(line) = lines.next_line().await? {
        match echo {
            Echo::Stdout => println!("    {}", line),
            Echo::Stderr => eprintln!("    {}", line),
            Echo::Off => {}
        }
        captured.push_str(&line);
        captured.push('\n');
    }
    Ok(captured)
}
