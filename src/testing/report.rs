//! Run results
//!
//! A `RunReport` records each step of a run with its timing relative to the
//! run start, so ordering can be checked after the fact.

use serde::Serialize;
use std::time::Instant;

use crate::common::Error;

/// Phase of the runner's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "query", rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    Building,
    ServerStarting,
    Ready,
    /// Running the query with this 1-based index
    Querying(usize),
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::NotStarted => write!(f, "not started"),
            Phase::Building => write!(f, "building"),
            Phase::ServerStarting => write!(f, "server starting"),
            Phase::Ready => write!(f, "ready"),
            Phase::Querying(n) => write!(f, "querying ({})", n),
            Phase::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Build,
    Launch,
    Await,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub kind: StepKind,
    pub name: String,
    pub status: StepStatus,
    /// Milliseconds from run start
    pub started_ms: u64,
    pub finished_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Why a run failed
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub kind: &'static str,
    pub message: String,
}

/// Result of a smoke run
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub name: String,
    pub passed: bool,
    /// Phase reached when the run ended
    pub phase: Phase,
    pub steps: Vec<StepRecord>,
    /// Whether cleanup stopped a live server
    pub server_terminated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    pub exit_code: i32,
    pub duration_ms: u64,
    #[serde(skip)]
    pub error: Option<Error>,
}

impl RunReport {
    /// Steps of one kind, in execution order
    pub fn steps_of(&self, kind: StepKind) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(move |s| s.kind == kind)
    }
}

/// Collects step records while a run is in progress
#[derive(Debug)]
pub struct Recorder {
    started: Instant,
    phase: Phase,
    steps: Vec<StepRecord>,
}

/// Token for a step that has started but not finished
#[derive(Debug)]
pub struct OpenStep {
    kind: StepKind,
    name: String,
    started_ms: u64,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            phase: Phase::NotStarted,
            steps: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
    }

    fn offset_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn start(&self, kind: StepKind, name: impl Into<String>) -> OpenStep {
        OpenStep {
            kind,
            name: name.into(),
            started_ms: self.offset_ms(),
        }
    }

    pub fn finish(
        &mut self,
        step: OpenStep,
        status: StepStatus,
        exit_code: Option<i32>,
        detail: Option<String>,
    ) {
        let finished_ms = self.offset_ms();
        self.steps.push(StepRecord {
            kind: step.kind,
            name: step.name,
            status,
            started_ms: step.started_ms,
            finished_ms,
            exit_code,
            detail,
        });
    }

    pub fn skip(&mut self, kind: StepKind, name: impl Into<String>, detail: &str) {
        let step = self.start(kind, name);
        self.finish(step, StepStatus::Skipped, None, Some(detail.to_string()));
    }

    /// Close the run with its outcome
    pub fn into_report(
        self,
        name: &str,
        outcome: Result<(), Error>,
        server_terminated: bool,
    ) -> RunReport {
        let duration_ms = self.offset_ms();
        let (passed, failure, exit_code, error) = match outcome {
            Ok(()) => (true, None, 0, None),
            Err(e) => (
                false,
                Some(Failure {
                    kind: e.kind(),
                    message: e.to_string(),
                }),
                e.exit_code(),
                Some(e),
            ),
        };

        RunReport {
            name: name.to_string(),
            passed,
            phase: self.phase,
            steps: self.steps,
            server_terminated,
            failure,
            exit_code,
            duration_ms,
            error,
        }
    }
}
