//! Server readiness detection
//!
//! A configured probe is polled with exponential backoff until it succeeds
//! or the ceiling elapses. Without a probe the runner waits the full ceiling,
//! which is the old fixed-sleep behavior. The server exiting during the wait
//! always aborts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::process::ManagedProcess;
use crate::testing::{OnTimeout, ProbeConfig, ReadinessConfig};

/// Upper bound for a single probe attempt
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Shortest slot given to an attempt made right at the ceiling
const MIN_ATTEMPT: Duration = Duration::from_millis(10);

/// A health check for a starting server
#[async_trait]
pub trait Probe: Send + Sync {
    /// Whether the server is ready right now
    async fn check(&self) -> bool;

    /// Human-readable description for logs and errors
    fn describe(&self) -> String;
}

/// Ready once a TCP connection succeeds
pub struct TcpProbe {
    addr: String,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> bool {
        TcpStream::connect(self.addr.as_str()).await.is_ok()
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.addr)
    }
}

/// Ready once a health-check command exits 0
pub struct CommandProbe {
    argv: Vec<String>,
    cwd: PathBuf,
}

impl CommandProbe {
    pub fn new(argv: Vec<String>, cwd: &Path) -> Self {
        Self {
            argv,
            cwd: cwd.to_path_buf(),
        }
    }
}

#[async_trait]
impl Probe for CommandProbe {
    async fn check(&self) -> bool {
        let Some((program, args)) = self.argv.split_first() else {
            return false;
        };
        Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn describe(&self) -> String {
        format!("command `{}`", self.argv.join(" "))
    }
}

/// Build the probe described by a plan
pub fn probe_from_config(config: &ProbeConfig, cwd: &Path) -> Box<dyn Probe> {
    match config {
        ProbeConfig::Tcp(addr) => Box::new(TcpProbe::new(addr.clone())),
        ProbeConfig::Command(argv) => Box::new(CommandProbe::new(argv.clone(), cwd)),
    }
}

/// Timing policy for the readiness wait
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    /// Maximum total wait
    pub ceiling: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub on_timeout: OnTimeout,
}

impl ReadinessPolicy {
    /// Plan values with config fallbacks
    pub fn resolve(plan: &ReadinessConfig, config: &Config) -> Self {
        Self {
            ceiling: Duration::from_secs(
                plan.ceiling_secs
                    .unwrap_or(config.timeouts.readiness_ceiling_secs),
            ),
            initial_interval: Duration::from_millis(
                plan.initial_interval_ms
                    .unwrap_or(config.readiness.initial_interval_ms),
            ),
            max_interval: Duration::from_millis(
                plan.max_interval_ms
                    .unwrap_or(config.readiness.max_interval_ms),
            ),
            on_timeout: plan.on_timeout,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval.max(self.initial_interval),
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: Some(self.ceiling),
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

/// How the readiness wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The probe succeeded
    Probed { attempts: u32, elapsed: Duration },
    /// No probe configured; the full ceiling elapsed
    DelayElapsed(Duration),
    /// The probe never succeeded and the policy says to proceed anyway
    CeilingReached { attempts: u32 },
}

/// Poll `probe` until it succeeds or the ceiling elapses
pub async fn wait_until_ready(probe: &dyn Probe, policy: &ReadinessPolicy) -> Result<Readiness> {
    let started = Instant::now();
    let mut backoff = policy.backoff();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = policy.ceiling.saturating_sub(started.elapsed());
        let slot = remaining.max(MIN_ATTEMPT).min(ATTEMPT_TIMEOUT);

        if tokio::time::timeout(slot, probe.check()).await.unwrap_or(false) {
            let elapsed = started.elapsed();
            tracing::info!(
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                probe = %probe.describe(),
                "Server ready"
            );
            return Ok(Readiness::Probed { attempts, elapsed });
        }
        tracing::trace!(attempt = attempts, probe = %probe.describe(), "Server not ready yet");

        let remaining = policy.ceiling.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            break;
        }
        // An exhausted backoff still gets one last attempt at the ceiling
        let delay = backoff.next_backoff().unwrap_or(remaining);
        tokio::time::sleep(delay.min(remaining)).await;
    }

    match policy.on_timeout {
        OnTimeout::Proceed => {
            tracing::warn!(
                attempts,
                ceiling_secs = policy.ceiling.as_secs(),
                probe = %probe.describe(),
                "Readiness ceiling reached without a successful probe, proceeding"
            );
            Ok(Readiness::CeilingReached { attempts })
        }
        OnTimeout::Fail => Err(Error::ReadinessTimeout(
            policy.ceiling.as_secs(),
            probe.describe(),
        )),
    }
}

/// Wait for `server` to become ready, aborting if it exits first
pub async fn await_server(
    server: &mut ManagedProcess,
    probe: Option<&dyn Probe>,
    policy: &ReadinessPolicy,
) -> Result<Readiness> {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner} {msg} ({elapsed})") {
        spinner.set_style(style);
    }
    spinner.set_message(match probe {
        Some(probe) => format!("waiting for {}", probe.describe()),
        None => format!("waiting {}s for server start", policy.ceiling.as_secs()),
    });
    spinner.enable_steady_tick(Duration::from_millis(100));

    let wait = async {
        match probe {
            Some(probe) => wait_until_ready(probe, policy).await,
            None => {
                tokio::time::sleep(policy.ceiling).await;
                Ok(Readiness::DelayElapsed(policy.ceiling))
            }
        }
    };

    let target = server.name().to_string();
    let result = tokio::select! {
        result = wait => result,
        status = server.wait_exit() => match status {
            Ok(status) => Err(Error::ServerExited { target, code: status.code() }),
            Err(e) => Err(Error::launch(&target, format!("lost track of server: {}", e))),
        },
    };

    spinner.finish_and_clear();
    result
}
