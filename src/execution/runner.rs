//! Pipeline runner - executes stages in order, gated on artifact files

use crate::{
    core::{
        artifact::{self, ResetReport},
        Pipeline, PipelineRun, RunStatus, Stage, StageFailure, StageOutcome, StageResult,
        StageWarning,
    },
    execution::process::{Invocation, ProcessError, ProcessRunner},
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Slack for filesystems that store modification times at second granularity
const MTIME_TOLERANCE: Duration = Duration::from_secs(1);

/// Events that can occur during a pipeline run
#[derive(Debug, Clone)]
pub enum RunEvent {
    ArtifactsCleared {
        removed: Vec<PathBuf>,
    },
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_stages: usize,
    },
    StageStarted {
        index: usize,
        stage_id: String,
        stage_name: String,
    },
    StageFinished {
        index: usize,
        result: StageResult,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&RunEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Unknown stage '{0}'")]
    UnknownStage(String),
}

/// Runs the stages of a pipeline one at a time
pub struct PipelineRunner<P> {
    process: P,
    event_handlers: Vec<EventHandler>,
}

impl<P: ProcessRunner> PipelineRunner<P> {
    pub fn new(process: P) -> Self {
        Self {
            process,
            event_handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    fn emit_event(&self, event: RunEvent) {
        for handler in &self.event_handlers {
            handler(&event);
        }
    }

    /// Delete every artifact the pipeline produces
    pub fn reset(&self, pipeline: &Pipeline) -> ResetReport {
        let report = artifact::remove_artifacts(pipeline.artifacts());
        info!(
            "Reset {}: removed {} artifact(s)",
            pipeline.name,
            report.removed.len()
        );
        self.emit_event(RunEvent::ArtifactsCleared {
            removed: report.removed.clone(),
        });
        report
    }

    /// Reset the artifacts, then run every stage
    pub async fn run_fresh(&self, pipeline: &Pipeline) -> PipelineRun {
        let report = self.reset(pipeline);
        let mut run = self.run_pipeline(pipeline).await;
        run.cleared = report.removed;
        run
    }

    /// Run every stage in order, halting at the first one that fails or is blocked
    pub async fn run_pipeline(&self, pipeline: &Pipeline) -> PipelineRun {
        let mut run = PipelineRun::new(&pipeline.name, pipeline.stages.len());
        run.start();

        info!(
            "Starting pipeline run: {} ({})",
            pipeline.name, run.run_id
        );
        self.emit_event(RunEvent::RunStarted {
            run_id: run.run_id,
            pipeline_name: pipeline.name.clone(),
            total_stages: pipeline.stages.len(),
        });

        for (index, stage) in pipeline.stages.iter().enumerate() {
            let result = match pipeline.gate_for(index) {
                Some(gate) if !gate.exists() => blocked(stage, gate),
                _ => {
                    self.emit_event(RunEvent::StageStarted {
                        index,
                        stage_id: stage.id.clone(),
                        stage_name: stage.name.clone(),
                    });
                    self.run_stage(stage).await
                }
            };

            self.emit_event(RunEvent::StageFinished {
                index,
                result: result.clone(),
            });

            let halted = !result.is_success();
            run.record(result);
            if halted {
                break;
            }
        }

        run.finish();

        info!(
            "Pipeline run finished: {} - {}",
            pipeline.name, run.status
        );
        self.emit_event(RunEvent::RunFinished {
            run_id: run.run_id,
            status: run.status,
        });

        run
    }

    /// Run one stage of a pipeline, applying the same gate as a full run
    pub async fn run_stage_gated(
        &self,
        pipeline: &Pipeline,
        stage_id: &str,
    ) -> Result<StageResult, RunnerError> {
        let index = pipeline
            .stage_index(stage_id)
            .ok_or_else(|| RunnerError::UnknownStage(stage_id.to_string()))?;
        let stage = &pipeline.stages[index];

        let result = match pipeline.gate_for(index) {
            Some(gate) if !gate.exists() => blocked(stage, gate),
            _ => {
                self.emit_event(RunEvent::StageStarted {
                    index,
                    stage_id: stage.id.clone(),
                    stage_name: stage.name.clone(),
                });
                self.run_stage(stage).await
            }
        };

        self.emit_event(RunEvent::StageFinished {
            index,
            result: result.clone(),
        });
        Ok(result)
    }

    /// Run a single stage and classify the outcome
    pub async fn run_stage(&self, stage: &Stage) -> StageResult {
        info!("Executing stage: {}", stage.id);
        let started_at = Utc::now();
        let started_clock = SystemTime::now();

        if !stage.executable_exists() {
            error!(
                "Stage {} executable not found: {}",
                stage.id,
                stage.executable.display()
            );
            return finish(
                stage,
                started_at,
                StageOutcome::Failed {
                    failure: StageFailure::MissingExecutable {
                        path: stage.executable.clone(),
                    },
                },
                format!("Executable '{}' not found", stage.executable.display()),
            );
        }

        let (program, args) = stage.command_line();
        let invocation = Invocation {
            program,
            args,
            env: stage.env.clone(),
            working_dir: stage.working_dir.clone(),
            timeout: stage.timeout,
        };

        let output = match self.process.run(&invocation).await {
            Ok(output) => output,
            Err(ProcessError::Timeout(after)) => {
                error!("Timeout for stage {} after {:?}", stage.id, after);
                let failure = StageFailure::ProcessTimeout { after };
                let text = format!("Timeout after {:.1} seconds", after.as_secs_f64());
                return finish(stage, started_at, StageOutcome::Failed { failure }, text);
            }
            Err(e @ ProcessError::Spawn { .. }) => {
                error!("Stage {} could not be started: {}", stage.id, e);
                let failure = StageFailure::SpawnFailed {
                    reason: e.to_string(),
                };
                return finish(stage, started_at, StageOutcome::Failed { failure }, e.to_string());
            }
        };

        let text = output.combined();
        if !output.success() {
            warn!("Stage {} exited with {:?}", stage.id, output.exit_code);
            let failure = StageFailure::NonZeroExit {
                code: output.exit_code,
            };
            return finish(stage, started_at, StageOutcome::Failed { failure }, text);
        }

        let mut result = finish(stage, started_at, StageOutcome::Succeeded, text);
        self.inspect_artifact(stage, started_clock, &mut result);
        result
    }

    /// Check the artifact of a stage that exited cleanly
    fn inspect_artifact(&self, stage: &Stage, started: SystemTime, result: &mut StageResult) {
        let modified = match artifact::modified_at(&stage.output) {
            Ok(modified) => modified,
            Err(e) => {
                result.outcome = StageOutcome::Failed {
                    failure: StageFailure::UnreadableArtifact {
                        artifact: stage.output.clone(),
                        reason: e.to_string(),
                    },
                };
                return;
            }
        };

        let Some(modified) = modified else {
            warn!(
                "Stage {} exited cleanly but {} is missing",
                stage.id,
                stage.output.display()
            );
            result.warnings.push(StageWarning::ArtifactMissing {
                artifact: stage.output.clone(),
            });
            return;
        };
        result.artifact_present = true;

        if modified + MTIME_TOLERANCE < started {
            warn!(
                "Stage {} left {} untouched; it predates the stage",
                stage.id,
                stage.output.display()
            );
            result.warnings.push(StageWarning::StaleArtifact {
                artifact: stage.output.clone(),
            });
        }

        if !stage.format.is_tabular() {
            return;
        }

        match artifact::count_records(&stage.output) {
            Ok(count) => {
                debug!("Stage {} produced {} record(s)", stage.id, count);
                result.record_count = Some(count);
                if count == 0 && stage.checks_records() {
                    warn!("Stage {} produced no records", stage.id);
                    result.outcome = StageOutcome::Failed {
                        failure: StageFailure::EmptyOutput {
                            artifact: stage.output.clone(),
                            hint: stage.empty_hint.clone(),
                        },
                    };
                }
            }
            Err(e) if stage.checks_records() => {
                result.outcome = StageOutcome::Failed {
                    failure: StageFailure::UnreadableArtifact {
                        artifact: stage.output.clone(),
                        reason: e.to_string(),
                    },
                };
            }
            Err(e) => debug!("Not counting records of {}: {}", stage.output.display(), e),
        }
    }
}

fn finish(
    stage: &Stage,
    started_at: chrono::DateTime<Utc>,
    outcome: StageOutcome,
    output: String,
) -> StageResult {
    StageResult {
        stage_id: stage.id.clone(),
        stage_name: stage.name.clone(),
        outcome,
        output,
        artifact_present: stage.output.exists(),
        record_count: None,
        warnings: Vec::new(),
        started_at,
        finished_at: Utc::now(),
    }
}

fn blocked(stage: &Stage, gate: &Path) -> StageResult {
    warn!(
        "Stage {} blocked: {} does not exist",
        stage.id,
        gate.display()
    );
    let now = Utc::now();
    StageResult {
        stage_id: stage.id.clone(),
        stage_name: stage.name.clone(),
        outcome: StageOutcome::Blocked {
            missing: gate.to_path_buf(),
        },
        output: String::new(),
        artifact_present: stage.output.exists(),
        record_count: None,
        warnings: Vec::new(),
        started_at: now,
        finished_at: now,
    }
}
