//! Run and stage result models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Default remediation for a stage that exited cleanly but produced no records
pub const DEFAULT_EMPTY_HINT: &str = "No data available for the requested period";

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run has not started
    NotStarted,
    /// A stage is currently running
    Running,
    /// Every stage succeeded
    Completed,
    /// Halted at a failed stage
    Failed,
    /// Halted because a stage's input artifact was absent
    Blocked,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(RunStatus::NotStarted),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "blocked" => Ok(RunStatus::Blocked),
            other => Err(format!("Unknown run status: {}", other)),
        }
    }
}

/// Why a stage failed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageFailure {
    #[error("executable not found: {}", .path.display())]
    MissingExecutable { path: PathBuf },

    #[error("timed out after {:.1}s", .after.as_secs_f64())]
    ProcessTimeout { after: Duration },

    #[error("exited with {}", describe_exit(.code))]
    NonZeroExit { code: Option<i32> },

    #[error("{} contains no records", .artifact.display())]
    EmptyOutput { artifact: PathBuf, hint: String },

    #[error("failed to start process: {reason}")]
    SpawnFailed { reason: String },

    #[error("cannot read {}: {reason}", .artifact.display())]
    UnreadableArtifact { artifact: PathBuf, reason: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl StageFailure {
    /// What the operator should do about it
    pub fn remediation(&self) -> &str {
        match self {
            StageFailure::MissingExecutable { .. } => "Check the stage script path in the pipeline file",
            StageFailure::ProcessTimeout { .. } => "The stage took too long; raise its timeout or check for hangs",
            StageFailure::NonZeroExit { .. } => "The stage script crashed; inspect its output",
            StageFailure::EmptyOutput { hint, .. } => hint,
            StageFailure::SpawnFailed { .. } => "Check that the interpreter is installed and on PATH",
            StageFailure::UnreadableArtifact { .. } => "The stage wrote a malformed artifact; inspect the file",
        }
    }
}

/// Non-fatal observations about a successful stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageWarning {
    /// Exited cleanly but the declared artifact is absent
    ArtifactMissing { artifact: PathBuf },
    /// The artifact was last modified before the stage started
    StaleArtifact { artifact: PathBuf },
}

impl fmt::Display for StageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageWarning::ArtifactMissing { artifact } => {
                write!(f, "reported success but {} was not produced", artifact.display())
            }
            StageWarning::StaleArtifact { artifact } => {
                write!(f, "{} predates this run and may be stale", artifact.display())
            }
        }
    }
}

/// Outcome of a single stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Failed { failure: StageFailure },
    /// Not attempted because the previous stage's artifact is absent
    Blocked { missing: PathBuf },
}

/// Result of one stage within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: String,
    pub stage_name: String,
    pub outcome: StageOutcome,

    /// Combined stdout and stderr of the child process
    pub output: String,

    /// Whether the declared artifact exists after the stage
    pub artifact_present: bool,

    /// Number of data records in a tabular artifact, when counted
    pub record_count: Option<usize>,

    pub warnings: Vec<StageWarning>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StageOutcome::Succeeded)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self.outcome, StageOutcome::Blocked { .. })
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match &self.outcome {
            StageOutcome::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    /// Wall-clock time spent on the stage
    pub fn duration(&self) -> Duration {
        self.finished_at
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// One-line reason for a stage that did not succeed
    pub fn reason(&self) -> Option<String> {
        match &self.outcome {
            StageOutcome::Succeeded => None,
            StageOutcome::Failed { failure } => Some(failure.to_string()),
            StageOutcome::Blocked { missing } => {
                Some(format!("blocked: {} does not exist", missing.display()))
            }
        }
    }
}

/// One execution of a pipeline
///
/// Returned by value from the runner; nothing about a run is kept anywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,

    /// Stage results in execution order, possibly shorter than the stage list
    pub results: Vec<StageResult>,

    pub total_stages: usize,

    /// Artifacts deleted by the reset preceding this run
    pub cleared: Vec<PathBuf>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(pipeline_name: impl Into<String>, total_stages: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_name: pipeline_name.into(),
            status: RunStatus::NotStarted,
            results: Vec::new(),
            total_stages,
            cleared: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark the run as started
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record a stage result, halting the run if it did not succeed
    pub fn record(&mut self, result: StageResult) {
        if let StageOutcome::Failed { .. } = result.outcome {
            self.halt(RunStatus::Failed);
        } else if result.is_blocked() {
            self.halt(RunStatus::Blocked);
        }
        self.results.push(result);
    }

    /// Mark the run as completed if nothing halted it
    pub fn finish(&mut self) {
        if self.status == RunStatus::Running || self.status == RunStatus::NotStarted {
            self.status = RunStatus::Completed;
            self.completed_at = Some(Utc::now());
        }
    }

    fn halt(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// True iff every stage succeeded
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
            && self.results.len() == self.total_stages
            && self.results.iter().all(StageResult::is_success)
    }

    /// The result that halted the run, if any
    pub fn halting_result(&self) -> Option<&StageResult> {
        self.results.iter().find(|r| !r.is_success())
    }

    pub fn succeeded_stages(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Fraction of stages that succeeded (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        self.succeeded_stages() as f64 / self.total_stages as f64
    }
}
