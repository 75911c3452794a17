//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Run only this stage (its predecessor's artifact must exist)
    #[arg(long)]
    pub stage: Option<String>,

    /// Keep existing artifacts instead of clearing them before a full run
    #[arg(long)]
    pub keep_artifacts: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Lines of stage output to show when a stage fails
    #[arg(long, default_value_t = 20)]
    pub tail: usize,
}

/// Delete pipeline artifacts
#[derive(Debug, Args, Clone)]
pub struct ResetCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,
}

/// Show pipeline readiness and artifacts
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines in history
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub details: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,
}
