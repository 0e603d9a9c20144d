//! Test runner implementation
//!
//! Drives one plan through Build -> Launch -> Await -> Query x N. The first
//! failing step ends the run; the server launched along the way is
//! terminated on every exit path, including SIGINT/SIGTERM.

use std::path::{Path, PathBuf};
use std::time::Duration;

use colored::Colorize;

use crate::cargo::{self, BuildCommand};
use crate::common::config::Config;
use crate::common::signal::shutdown_signal;
use crate::common::{tail_lines, Error, Result};
use crate::process::{invoke, Invocation, InvokeSpec, ManagedProcess, SpawnSpec};
use crate::readiness::{await_server, probe_from_config, Readiness, ReadinessPolicy};

use super::config::{QueryExpectation, QueryStep, TestPlan};
use super::report::{OpenStep, Phase, Recorder, RunReport, StepKind, StepStatus};

/// Lines of client stderr kept in an invocation error
const STDERR_TAIL_LINES: usize = 10;

/// Settings for one run that do not come from the plan
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Project root every process runs in
    pub root: PathBuf,
    /// Skip the build step regardless of the plan
    pub skip_build: bool,
    /// Stream client output as it arrives
    pub echo: bool,
}

/// Run a plan to completion and report the outcome
///
/// Never returns early: the server slot is drained after the sequence ends,
/// whether it succeeded, failed, or was interrupted.
pub async fn run_plan(plan: &TestPlan, options: &RunOptions, config: &Config) -> RunReport {
    let mut recorder = Recorder::new();
    let mut server: Option<ManagedProcess> = None;

    println!(
        "\n{} {}",
        "Running Smoke Test:".blue().bold(),
        plan.name.white().bold()
    );
    if let Some(desc) = &plan.description {
        println!("  {}", desc.trim().dimmed());
    }
    tracing::debug!(root = %options.root.display(), "Project root");

    let outcome = tokio::select! {
        result = drive(plan, options, config, &mut recorder, &mut server) => result,
        interrupt = shutdown_signal() => {
            println!("\n{} {}", "!".yellow().bold(), format!("Interrupted by {}", interrupt).yellow());
            Err(Error::Interrupted(interrupt))
        }
    };

    let server_terminated = cleanup(&mut server, config.shutdown_grace()).await;

    match &outcome {
        Ok(()) => {
            recorder.enter(Phase::Done);
            println!(
                "\n{} {}\n",
                "✓".green().bold(),
                "All tests passed!".green().bold()
            );
        }
        Err(e) => {
            println!(
                "\n{} {} ({})\n",
                "✗".red().bold(),
                "Smoke test failed".red().bold(),
                recorder.phase()
            );
            tracing::error!(kind = e.kind(), phase = %recorder.phase(), "{}", e);
        }
    }

    recorder.into_report(&plan.name, outcome, server_terminated)
}

/// The linear step sequence
async fn drive(
    plan: &TestPlan,
    options: &RunOptions,
    config: &Config,
    recorder: &mut Recorder,
    server_slot: &mut Option<ManagedProcess>,
) -> Result<()> {
    // Build
    recorder.enter(Phase::Building);
    let build = if options.skip_build {
        None
    } else {
        BuildCommand::from_plan(plan, &config.build.program)
    };
    match build {
        Some(cmd) => {
            banner("Building", &cmd.display());
            let step = recorder.start(StepKind::Build, cmd.display());
            let result = cmd.run(&options.root).await;
            settle(recorder, step, result, |_| None)?;
            check("Build finished");
        }
        None => {
            banner("Building", "nothing to build");
            recorder.skip(StepKind::Build, "build", "nothing to build");
        }
    }

    // Launch
    recorder.enter(Phase::ServerStarting);
    let server_name = plan.server.target.name();
    banner("Starting server", &server_name);
    let step = recorder.start(StepKind::Launch, server_name.as_str());
    let result = launch_server(plan, options, server_slot);
    let pid = settle(recorder, step, result, |pid| pid.map(|p| format!("pid {}", p)))?;
    if let Some(pid) = pid {
        check(&format!("Server started (pid {})", pid));
    }

    // Await
    let policy = ReadinessPolicy::resolve(&plan.server.readiness, config);
    let probe = plan
        .server
        .readiness
        .probe
        .as_ref()
        .map(|p| probe_from_config(p, &options.root));
    let waiting_for = match &probe {
        Some(probe) => format!("{} (up to {}s)", probe.describe(), policy.ceiling.as_secs()),
        None => format!("fixed delay of {}s", policy.ceiling.as_secs()),
    };
    banner("Waiting for server", &waiting_for);
    let step = recorder.start(StepKind::Await, waiting_for.as_str());
    let server = server_slot
        .as_mut()
        .ok_or_else(|| Error::Internal("server slot empty after launch".to_string()))?;
    let result = await_server(server, probe.as_deref(), &policy).await;
    let readiness = settle(recorder, step, result, |r| Some(describe_readiness(r)))?;
    check(&describe_readiness(&readiness));
    recorder.enter(Phase::Ready);

    // Queries
    let total = plan.queries.len();
    for (i, query) in plan.queries.iter().enumerate() {
        recorder.enter(Phase::Querying(i + 1));
        let name = query.display_name(i);
        banner(&format!("Query {}/{}", i + 1, total), &name);
        println!("  {}", query.query.dimmed());

        let step = recorder.start(StepKind::Query, name.as_str());
        match run_query(plan, options, config, query, &name).await {
            Ok(invocation) => {
                let code = invocation.code();
                recorder.finish(step, StepStatus::Passed, code, None);
                check(&format!(
                    "{} ({} ms)",
                    name,
                    invocation.duration.as_millis()
                ));
            }
            Err(e) => {
                println!("  {} {}", "✗".red(), e);
                recorder.finish(step, StepStatus::Failed, exit_code_of(&e), Some(e.to_string()));
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Spawn the server into the (empty) slot and return its pid
fn launch_server(
    plan: &TestPlan,
    options: &RunOptions,
    slot: &mut Option<ManagedProcess>,
) -> Result<Option<u32>> {
    if slot.is_some() {
        return Err(Error::Internal("a server is already running".to_string()));
    }

    let target = &plan.server.target;
    let name = target.name();
    let program = cargo::locate(&options.root, plan.build.profile, target)
        .map_err(|reason| Error::launch(&name, reason))?;

    let process = ManagedProcess::spawn(SpawnSpec {
        name: &name,
        program: &program,
        args: &plan.server.args,
        env: plan
            .server
            .env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
        cwd: &options.root,
        quiet: plan.server.quiet,
    })?;

    let pid = process.pid();
    *slot = Some(process);
    Ok(pid)
}

/// Run one query and check its expectations
async fn run_query(
    plan: &TestPlan,
    options: &RunOptions,
    config: &Config,
    query: &QueryStep,
    name: &str,
) -> Result<Invocation> {
    let client = &plan.client;
    let program = cargo::locate(&options.root, plan.build.profile, &client.target)
        .map_err(|reason| Error::invocation_spawn(name, reason))?;

    let args: Vec<&str> = client
        .args
        .iter()
        .chain(query.args.iter())
        .map(String::as_str)
        .chain(std::iter::once(query.query.as_str()))
        .collect();
    let timeout_secs = query
        .timeout_secs
        .or(client.timeout_secs)
        .unwrap_or(config.timeouts.invocation_secs);

    let invocation = invoke(InvokeSpec {
        name,
        program: &program,
        args,
        env: client
            .env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
        cwd: &options.root,
        timeout: Duration::from_secs(timeout_secs),
        echo: options.echo,
    })
    .await?;

    check_expectation(name, &invocation, query.expect.as_ref())?;
    Ok(invocation)
}

/// Compare an invocation against its expectations
///
/// Without expectations the client must exit 0.
fn check_expectation(
    name: &str,
    invocation: &Invocation,
    expect: Option<&QueryExpectation>,
) -> Result<()> {
    let expect_success = expect.and_then(|e| e.success).unwrap_or(true);

    if expect_success && !invocation.success() {
        return Err(Error::Invocation {
            name: name.to_string(),
            code: invocation.code(),
            stderr_tail: tail_lines(&invocation.stderr, STDERR_TAIL_LINES),
        });
    }
    if !expect_success && invocation.success() {
        return Err(Error::TestAssertion(format!(
            "{}: expected the client to fail, but it exited 0",
            name
        )));
    }

    if let Some(needle) = expect.and_then(|e| e.output_contains.as_deref()) {
        if !invocation.stdout.contains(needle) {
            return Err(Error::TestAssertion(format!(
                "{}: expected output to contain '{}', got:\n{}",
                name,
                needle,
                tail_lines(&invocation.stdout, STDERR_TAIL_LINES)
            )));
        }
    }

    Ok(())
}

/// Terminate the server if one was launched
async fn cleanup(slot: &mut Option<ManagedProcess>, grace: Duration) -> bool {
    let Some(mut server) = slot.take() else {
        tracing::debug!("No server launched, nothing to clean up");
        return false;
    };

    if server.is_live() {
        let label = match server.pid() {
            Some(pid) => format!("{} (pid {})", server.name(), pid),
            None => server.name().to_string(),
        };
        banner("Stopping server", &label);
    }
    server.terminate(grace).await
}

/// Record a step's outcome and pass the result through
fn settle<T>(
    recorder: &mut Recorder,
    step: OpenStep,
    result: Result<T>,
    detail: impl FnOnce(&T) -> Option<String>,
) -> Result<T> {
    match &result {
        Ok(value) => recorder.finish(step, StepStatus::Passed, None, detail(value)),
        Err(e) => {
            println!("  {} {}", "✗".red(), e);
            recorder.finish(step, StepStatus::Failed, exit_code_of(e), Some(e.to_string()));
        }
    }
    result
}

fn exit_code_of(error: &Error) -> Option<i32> {
    match error {
        Error::Build { code, .. }
        | Error::Invocation { code, .. }
        | Error::ServerExited { code, .. } => *code,
        _ => None,
    }
}

fn describe_readiness(readiness: &Readiness) -> String {
    match readiness {
        Readiness::Probed { attempts, elapsed } => format!(
            "Server ready after {} ms ({} probe{})",
            elapsed.as_millis(),
            attempts,
            if *attempts == 1 { "" } else { "s" }
        ),
        Readiness::DelayElapsed(delay) => {
            format!("Waited {}s for server start", delay.as_secs())
        }
        Readiness::CeilingReached { attempts } => format!(
            "Server did not answer {} probes, continuing anyway",
            attempts
        ),
    }
}

fn banner(step: &str, detail: &str) {
    println!("\n{} {} {}", "==>".cyan().bold(), step.cyan(), detail.dimmed());
}

fn check(message: &str) {
    println!("  {} {}", "✓".green(), message);
}

/// Pick the project root: explicit flag, plan `root`, nearest `Cargo.toml`
/// above the current directory, or the current directory itself
pub fn resolve_root(
    explicit: Option<&Path>,
    plan: &TestPlan,
    plan_path: Option<&Path>,
) -> Result<PathBuf> {
    use crate::common::paths::{find_project_root, resolve_against};

    let cwd = std::env::current_dir()?;
    if let Some(root) = explicit {
        return Ok(resolve_against(&cwd, root));
    }
    if let Some(root) = &plan.root {
        let base = plan_path
            .and_then(Path::parent)
            .map(|dir| resolve_against(&cwd, dir))
            .unwrap_or_else(|| cwd.clone());
        return Ok(resolve_against(&base, root));
    }
    Ok(find_project_root(&cwd).unwrap_or(cwd))
}
