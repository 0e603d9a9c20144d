//! CLI command handling
//!
//! Dispatches CLI commands and turns their outcome into a process exit code.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::testing::{self, ProbeConfig, RunOptions, RunReport, TestPlan};

/// Dispatch a CLI command, returning the exit code to report
pub async fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            plan,
            root,
            skip_build,
            report,
            quiet,
        } => run(plan.as_deref(), root.as_deref(), skip_build, report, quiet).await,

        Commands::Validate { plan } => {
            let loaded = TestPlan::load(&plan)?;
            print_summary(&loaded);
            println!("\n{} {}", "✓".green(), "Plan is valid".green());
            Ok(0)
        }

        Commands::ShowPlan => {
            print!("{}", TestPlan::builtin_yaml());
            Ok(0)
        }
    }
}

async fn run(
    plan_path: Option<&Path>,
    root: Option<&Path>,
    skip_build: bool,
    report_path: Option<PathBuf>,
    quiet: bool,
) -> Result<i32> {
    let config = Config::load()?;
    let plan = match plan_path {
        Some(path) => TestPlan::load(path)?,
        None => TestPlan::builtin()?,
    };

    let root = testing::resolve_root(root, &plan, plan_path)?;
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "project root '{}' is not a directory",
            root.display()
        )));
    }

    let options = RunOptions {
        root,
        skip_build,
        echo: !quiet,
    };
    let report = testing::run_plan(&plan, &options, &config).await;

    if let Some(path) = report_path {
        write_report(&path, &report);
    }

    if let Some(error) = &report.error {
        eprintln!("Error: {}", error);
    }
    Ok(report.exit_code)
}

/// Write the JSON report; a failure here does not change the run's outcome
fn write_report(path: &Path, report: &RunReport) {
    let written = serde_json::to_string_pretty(report)
        .map_err(Error::from)
        .and_then(|json| std::fs::write(path, json).map_err(Error::from));

    match written {
        Ok(()) => tracing::info!(path = %path.display(), "Wrote run report"),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to write run report");
            eprintln!("Warning: could not write report to {}: {}", path.display(), e);
        }
    }
}

fn print_summary(plan: &TestPlan) {
    println!("{} {}", "Plan:".blue().bold(), plan.name.white().bold());
    println!("  server:  {}", plan.server.target.name());
    println!("  client:  {}", plan.client.target.name());
    let readiness = match &plan.server.readiness.probe {
        Some(ProbeConfig::Tcp(addr)) => format!("tcp {}", addr),
        Some(ProbeConfig::Command(argv)) => format!("command `{}`", argv.join(" ")),
        None => "fixed delay".to_string(),
    };
    println!("  ready:   {}", readiness);
    println!("  queries: {}", plan.queries.len());
    for (i, query) in plan.queries.iter().enumerate() {
        println!("    {}. {} {}", i + 1, query.display_name(i), query.query.dimmed());
    }
}
