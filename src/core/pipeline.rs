//! Pipeline domain model

use crate::core::{
    artifact::ArtifactStatus,
    config::PipelineConfig,
    stage::{Interpreter, Stage, StageDefaults},
};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A pipeline definition: an ordered list of stages
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Directory stages run in
    pub working_dir: PathBuf,

    /// Stages in execution order
    pub stages: Vec<Stage>,

    /// Files that must exist before running (resolved paths)
    pub prerequisites: Vec<PathBuf>,
}

/// Which inputs of a pipeline are missing
#[derive(Debug, Clone, Default, Serialize)]
pub struct Readiness {
    pub missing_executables: Vec<PathBuf>,
    pub missing_prerequisites: Vec<PathBuf>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.missing_executables.is_empty() && self.missing_prerequisites.is_empty()
    }
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let working_dir = config.resolved_working_dir();
        let defaults = StageDefaults {
            timeout_secs: config
                .default_timeout_secs
                .unwrap_or(StageDefaults::default().timeout_secs),
            interpreter: config.interpreter.as_ref().map(Interpreter::from),
            env: config.env.clone(),
            working_dir: working_dir.clone(),
        };

        Pipeline {
            name: config.name.clone(),
            stages: config
                .stages
                .iter()
                .map(|stage_config| Stage::from_config(stage_config, &defaults))
                .collect(),
            prerequisites: config
                .prerequisites
                .iter()
                .map(|p| working_dir.join(p))
                .collect(),
            working_dir,
        }
    }

    /// Build a pipeline directly from stages
    pub fn new(name: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            name: name.into(),
            working_dir: PathBuf::from("."),
            stages,
            prerequisites: Vec::new(),
        }
    }

    /// Get a stage by ID
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Position of a stage in the execution order
    pub fn stage_index(&self, id: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.id == id)
    }

    /// Artifact that must exist before the stage at `index` may run
    ///
    /// The first stage has no gate.
    pub fn gate_for(&self, index: usize) -> Option<&Path> {
        index
            .checked_sub(1)
            .and_then(|prev| self.stages.get(prev))
            .map(|prev| prev.output.as_path())
    }

    /// Every artifact the pipeline produces, in stage order
    pub fn artifacts(&self) -> impl Iterator<Item = &Path> {
        self.stages.iter().map(|s| s.output.as_path())
    }

    /// Check that stage executables and prerequisite files exist
    pub fn readiness(&self) -> Readiness {
        Readiness {
            missing_executables: self
                .stages
                .iter()
                .filter(|s| !s.executable_exists())
                .map(|s| s.executable.clone())
                .collect(),
            missing_prerequisites: self
                .prerequisites
                .iter()
                .filter(|p| !p.exists())
                .cloned()
                .collect(),
        }
    }

    /// Current state of each stage's artifact
    pub fn artifact_statuses(&self) -> Vec<(&Stage, ArtifactStatus)> {
        self.stages
            .iter()
            .map(|s| (s, ArtifactStatus::inspect(&s.output, s.format.is_tabular())))
            .collect()
    }
}
