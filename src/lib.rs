//! Smoke runner - end-to-end smoke tests for server/client executable pairs
//!
//! This library builds a server and a client, keeps the server running in
//! the background behind a cleanup guard, and drives the client through an
//! ordered list of queries.

pub mod cargo;
pub mod cli;
pub mod commands;
pub mod common;
pub mod process;
pub mod readiness;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use testing::{run_plan, RunOptions, RunReport, TestPlan};
