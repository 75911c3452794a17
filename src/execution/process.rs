//! Child process execution with a wall-clock timeout

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Everything needed to launch one stage process
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

/// What a finished process left behind
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len());
        text.push_str(&self.stdout);
        text.push_str(&self.stderr);
        text
    }
}

/// Error types for process execution
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
}

/// Trait for process execution - allows for different implementations
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the invocation to completion or until its timeout expires
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError>;
}

/// Runs stages as real OS subprocesses
#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner;

impl SubprocessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    /// Spawn the process and capture its output
    ///
    /// Output is decoded lossily: undecodable bytes become U+FFFD instead of
    /// failing the stage. On timeout the child is killed and nothing of its
    /// output is kept.
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        debug!(
            "Spawning {} {:?} in {}",
            invocation.program,
            invocation.args,
            invocation.working_dir.display()
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Leads its own group so a timeout also reaches what the script started
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| ProcessError::Spawn {
            program: invocation.program.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        // Dropping the pending future on timeout drops the child, which kills it
        let output = match timeout(invocation.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| ProcessError::Spawn {
                program: invocation.program.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                warn!("{} exceeded {:?}, killing it", invocation.program, invocation.timeout);
                kill_process_group(pid);
                return Err(ProcessError::Timeout(invocation.timeout));
            }
        };

        let result = ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            "{} exited with {:?} ({} bytes of output)",
            invocation.program,
            result.exit_code,
            result.stdout.len() + result.stderr.len()
        );

        Ok(result)
    }
}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        // Nothing left in the group
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Could not kill process group {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
