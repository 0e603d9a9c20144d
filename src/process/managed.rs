//! Background server process guard
//!
//! `ManagedProcess` owns the spawned server for the whole run. `terminate`
//! is idempotent and is called once on the runner's single exit path;
//! `Drop` is a synchronous last resort for paths that never reached it.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::common::{Error, Result};

/// Spawn parameters for a background process
#[derive(Debug, Clone)]
pub struct SpawnSpec<'a> {
    /// Display name used in logs and errors
    pub name: &'a str,
    pub program: &'a Path,
    pub args: &'a [String],
    pub env: Vec<(&'a str, &'a str)>,
    pub cwd: &'a Path,
    /// Discard stdout/stderr instead of inheriting them
    pub quiet: bool,
}

/// A background process owned by the runner
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    child: Child,
    pid: Option<u32>,
    live: bool,
}

impl ManagedProcess {
    /// Start the process without waiting for it
    ///
    /// On unix the process leads its own process group so termination also
    /// reaches anything it spawned.
    pub fn spawn(spec: SpawnSpec<'_>) -> Result<Self> {
        let output = || {
            if spec.quiet {
                Stdio::null()
            } else {
                Stdio::inherit()
            }
        };

        let mut cmd = Command::new(spec.program);
        cmd.args(spec.args)
            .envs(spec.env.iter().copied())
            .current_dir(spec.cwd)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| Error::launch(spec.name, format!("{}: {}", spec.program.display(), e)))?;
        let pid = child.id();

        tracing::info!(target_name = spec.name, pid = ?pid, "Launched background process");

        Ok(Self {
            name: spec.name.to_string(),
            child,
            pid,
            live: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process identifier recorded at launch
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process is still running
    pub fn is_live(&mut self) -> bool {
        if self.live && !matches!(self.child.try_wait(), Ok(None)) {
            self.live = false;
        }
        self.live
    }

    /// Wait for the process to exit on its own
    pub async fn wait_exit(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await;
        self.live = false;
        status
    }

    /// Terminate the process: SIGTERM to its group, then SIGKILL after `grace`
    ///
    /// Returns `true` if this call stopped a live process. Calling it on an
    /// already-exited or already-terminated process is a no-op.
    pub async fn terminate(&mut self, grace: Duration) -> bool {
        if !self.is_live() {
            tracing::debug!(target_name = %self.name, "Process already stopped");
            return false;
        }

        tracing::info!(target_name = %self.name, pid = ?self.pid, "Terminating background process");

        #[cfg(unix)]
        {
            self.signal_group(libc::SIGTERM);
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(target_name = %self.name, %status, "Process exited after SIGTERM");
                    self.signal_group(libc::SIGKILL);
                    self.live = false;
                    return true;
                }
                Ok(Err(e)) => {
                    tracing::warn!(target_name = %self.name, error = %e, "Failed waiting for process");
                }
                Err(_) => {
                    tracing::warn!(
                        target_name = %self.name,
                        grace_ms = grace.as_millis() as u64,
                        "Process ignored SIGTERM, killing"
                    );
                }
            }
            self.signal_group(libc::SIGKILL);
        }

        #[cfg(not(unix))]
        let _ = grace;

        if let Err(e) = self.child.kill().await {
            tracing::debug!(target_name = %self.name, error = %e, "Kill after exit");
        }
        self.live = false;
        true
    }

    /// Send `signal` to the process group, ignoring groups that are gone
    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) {
        let Some(pid) = self.pid else {
            return;
        };
        // The group id equals the leader's pid because of process_group(0)
        let result = unsafe { libc::killpg(pid as libc::pid_t, signal) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::debug!(pid, signal, error = %err, "killpg failed");
            }
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if !self.live {
            return;
        }
        tracing::warn!(target_name = %self.name, pid = ?self.pid, "Process guard dropped while live, killing");

        #[cfg(unix)]
        self.signal_group(libc::SIGKILL);

        // Best-effort since we can't await in drop
        let _ = self.child.start_kill();
    }
}
