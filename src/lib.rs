//! stagegate - runs external scripts as ordered stages gated on their output files

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::{Pipeline, PipelineRun, RunStatus, Stage, StageFailure, StageOutcome, StageResult};
pub use execution::{PipelineRunner, ProcessRunner, RunEvent, SubprocessRunner};
