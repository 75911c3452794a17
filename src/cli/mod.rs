//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ListCommand, ResetCommand, RunCommand, StatusCommand, ValidateCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Staged, file-gated pipeline runner
#[derive(Debug, Parser, Clone)]
#[command(name = "stagegate")]
#[command(author = "Stagegate Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Runs external scripts as ordered stages gated on their output files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run history database (defaults to the user data directory)
    #[arg(long, global = true)]
    pub history_db: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the whole pipeline, or a single stage
    Run(RunCommand),

    /// Delete every artifact the pipeline produces
    Reset(ResetCommand),

    /// Show scripts, prerequisites and artifacts
    Status(StatusCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// List pipelines with recorded runs
    List(ListCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
