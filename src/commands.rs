//! CLI command definitions
//!
//! Defines the clap commands for the smoke runner.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a smoke test plan (the built-in gRPC example plan by default)
    Run {
        /// Path to a YAML plan file
        plan: Option<PathBuf>,

        /// Project root to build and run in (default: plan `root`, then the
        /// nearest directory with a Cargo.toml)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Skip the build step and use existing artifacts
        #[arg(long)]
        skip_build: bool,

        /// Write a JSON report of the run to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Do not echo client output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Check that a plan file parses and is valid
    Validate {
        /// Path to the YAML plan file
        plan: PathBuf,
    },

    /// Print the built-in plan
    ShowPlan,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run {
            plan: None,
            root: None,
            skip_build: false,
            report: None,
            quiet: false,
        }
    }
}
