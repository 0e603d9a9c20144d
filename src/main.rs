//! Smoke runner CLI - end-to-end smoke tests for server/client pairs
//!
//! Builds the targets, starts the server, waits for it to become ready and
//! runs each query through the client, stopping the server on every exit path.

use clap::Parser;
use smoke::common::logging;
use smoke::{cli, commands::Commands};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "smoke", about = "End-to-end smoke test runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_guard = logging::init_cli(cli.verbose, cli.log_file.as_deref());

    let code = match cli::dispatch(cli.command.unwrap_or_default()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };

    // process::exit skips destructors; flush the file log first
    drop(log_guard);
    std::process::exit(code);
}
