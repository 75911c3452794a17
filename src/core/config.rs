//! Pipeline configuration from YAML

use crate::core::stage::ArtifactFormat;
use crate::core::Pipeline;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Directory stage paths are relative to (relative to the config file itself)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Default timeout for stages (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Default interpreter for stage scripts
    #[serde(default)]
    pub interpreter: Option<InterpreterConfig>,

    /// Environment variables passed to every stage
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Files that must exist for the pipeline to be usable (e.g. trained models)
    #[serde(default)]
    pub prerequisites: Vec<PathBuf>,

    /// Stages, in execution order
    pub stages: Vec<StageConfig>,

    /// Directory the config was loaded from (not serialized)
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// Interpreter used to launch a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage identifier
    pub id: String,

    /// Human-readable stage name
    pub name: String,

    /// Script (or binary) to run
    pub script: PathBuf,

    /// Artifact the stage writes
    pub output: PathBuf,

    /// Artifact format; inferred from the extension when absent
    #[serde(default)]
    pub format: Option<ArtifactFormat>,

    /// Fail the stage when a tabular artifact has no records
    #[serde(default = "default_validate_records")]
    pub validate_records: bool,

    /// Timeout for this stage (overrides the default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Interpreter for this stage (overrides the default)
    #[serde(default)]
    pub interpreter: Option<InterpreterConfig>,

    /// Extra environment variables for this stage
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Message shown when the artifact has no records
    #[serde(default)]
    pub empty_hint: Option<String>,
}

fn default_validate_records() -> bool {
    true
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::from_yaml(&content)?;

        // `pipeline.yaml` has an empty parent
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let base_dir = std::path::absolute(parent)
            .with_context(|| format!("Failed to resolve {}", parent.display()))?;
        config.base_dir = Some(base_dir);
        Ok(config)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            anyhow::bail!("Pipeline '{}' has no stages", self.name);
        }

        if self.default_timeout_secs == Some(0) {
            anyhow::bail!("default_timeout_secs must be greater than zero");
        }

        if let Some(interpreter) = &self.interpreter {
            if interpreter.program.trim().is_empty() {
                anyhow::bail!("Default interpreter has an empty program");
            }
        }

        let mut seen_ids = HashSet::new();
        let mut seen_outputs = HashSet::new();
        for stage in &self.stages {
            if stage.id.trim().is_empty() {
                anyhow::bail!("Stage '{}' has an empty id", stage.name);
            }
            if !seen_ids.insert(&stage.id) {
                anyhow::bail!("Duplicate stage ID: {}", stage.id);
            }
            if stage.script.as_os_str().is_empty() {
                anyhow::bail!("Stage '{}' has no script", stage.id);
            }
            if stage.output.as_os_str().is_empty() {
                anyhow::bail!("Stage '{}' has no output", stage.id);
            }
            // Each artifact has exactly one producer
            if !seen_outputs.insert(&stage.output) {
                anyhow::bail!(
                    "Stage '{}' writes {} which another stage already writes",
                    stage.id,
                    stage.output.display()
                );
            }
            if stage.timeout_secs == Some(0) {
                anyhow::bail!("Stage '{}' has a zero timeout", stage.id);
            }
            if let Some(interpreter) = &stage.interpreter {
                if interpreter.program.trim().is_empty() {
                    anyhow::bail!("Stage '{}' has an interpreter with an empty program", stage.id);
                }
            }
        }

        Ok(())
    }

    /// Directory stage paths resolve against
    ///
    /// Absolute whenever the current directory can be read, since stages
    /// also run with it as their working directory.
    pub fn resolved_working_dir(&self) -> PathBuf {
        let base = self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let dir = match &self.working_dir {
            Some(dir) => base.join(dir),
            None => base,
        };
        std::path::absolute(&dir).unwrap_or(dir)
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}
