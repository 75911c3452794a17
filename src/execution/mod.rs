//! Pipeline execution: child processes and the stage runner

pub mod process;
pub mod runner;

pub use process::{Invocation, ProcessError, ProcessOutput, ProcessRunner, SubprocessRunner};
pub use runner::{EventHandler, PipelineRunner, RunEvent, RunnerError};
