//! Smoke test plans and their runner
//!
//! A plan names a server and a client, the queries to send through the
//! client, and how to tell when the server is ready. The runner executes
//! it step by step and produces a structured report.

mod config;
mod report;
mod runner;

pub use config::*;
pub use report::{Failure, Phase, RunReport, StepKind, StepRecord, StepStatus};
pub use runner::{resolve_root, run_plan, RunOptions};
