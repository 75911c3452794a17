//! Stage domain model

use crate::core::config::{InterpreterConfig, StageConfig};
use crate::core::state::DEFAULT_EMPTY_HINT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the runner treats a stage's artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Row/column file with a header line; records can be counted
    Csv,
    /// Anything else; only existence is checked
    Opaque,
}

impl ArtifactFormat {
    /// Infer the format from a file extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ArtifactFormat::Csv,
            _ => ArtifactFormat::Opaque,
        }
    }

    pub fn is_tabular(&self) -> bool {
        matches!(self, ArtifactFormat::Csv)
    }
}

/// Program that runs a stage script, e.g. `python -X utf8`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
}

impl From<&InterpreterConfig> for Interpreter {
    fn from(config: &InterpreterConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

/// A single stage in a pipeline
#[derive(Debug, Clone)]
pub struct Stage {
    /// Unique stage identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Script or binary this stage runs
    pub executable: PathBuf,

    /// Runs the executable when set; otherwise it is spawned directly
    pub interpreter: Option<Interpreter>,

    /// Artifact the stage is expected to write
    pub output: PathBuf,

    pub format: ArtifactFormat,

    /// Treat a tabular artifact with zero records as a failure
    pub validate_records: bool,

    pub timeout: Duration,

    /// Added on top of the inherited environment
    pub env: BTreeMap<String, String>,

    /// Remediation shown when the artifact has no records
    pub empty_hint: String,

    /// Directory the process runs in
    pub working_dir: PathBuf,
}

/// Pipeline-wide values a stage falls back to
#[derive(Debug, Clone)]
pub struct StageDefaults {
    pub timeout_secs: u64,
    pub interpreter: Option<Interpreter>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
}

impl Default for StageDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 600, // 10 minutes
            interpreter: None,
            env: BTreeMap::new(),
            working_dir: PathBuf::from("."),
        }
    }
}

impl Stage {
    /// Create a stage from its config, resolving paths against the working directory
    pub fn from_config(config: &StageConfig, defaults: &StageDefaults) -> Self {
        let output = defaults.working_dir.join(&config.output);
        let format = config
            .format
            .unwrap_or_else(|| ArtifactFormat::from_path(&output));

        let mut env = defaults.env.clone();
        env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Stage {
            id: config.id.clone(),
            name: config.name.clone(),
            executable: defaults.working_dir.join(&config.script),
            interpreter: config
                .interpreter
                .as_ref()
                .map(Interpreter::from)
                .or_else(|| defaults.interpreter.clone()),
            output,
            format,
            validate_records: config.validate_records,
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(defaults.timeout_secs)),
            env,
            empty_hint: config
                .empty_hint
                .clone()
                .unwrap_or_else(|| DEFAULT_EMPTY_HINT.to_string()),
            working_dir: defaults.working_dir.clone(),
        }
    }

    /// Create a stage that runs `executable` directly, with defaults for everything else
    pub fn new(
        id: impl Into<String>,
        executable: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        let id = id.into();
        let output = output.into();
        Stage {
            name: id.clone(),
            id,
            executable: executable.into(),
            interpreter: None,
            format: ArtifactFormat::from_path(&output),
            output,
            validate_records: true,
            timeout: Duration::from_secs(StageDefaults::default().timeout_secs),
            env: BTreeMap::new(),
            empty_hint: DEFAULT_EMPTY_HINT.to_string(),
            working_dir: PathBuf::from("."),
        }
    }

    pub fn with_interpreter(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.interpreter = Some(Interpreter {
            program: program.into(),
            args,
        });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Whether the executable reference resolves to an existing file
    pub fn executable_exists(&self) -> bool {
        self.executable.is_file()
    }

    /// Whether the zero-record check applies to this stage
    pub fn checks_records(&self) -> bool {
        self.validate_records && self.format.is_tabular()
    }

    /// Program and arguments used to launch the stage
    pub fn command_line(&self) -> (String, Vec<String>) {
        let script = self.executable.to_string_lossy().into_owned();
        match &self.interpreter {
            Some(interpreter) => {
                let mut args = interpreter.args.clone();
                args.push(script);
                (interpreter.program.clone(), args)
            }
            None => (script, Vec::new()),
        }
    }
}
