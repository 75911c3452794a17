//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{PipelineRun, RunStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Final status
    pub status: RunStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if it did)
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of stages in the pipeline
    pub total_stages: usize,

    /// Number of stages that succeeded
    pub succeeded_stages: usize,

    /// Stage the run halted at
    pub halted_at: Option<String>,

    /// Why it halted there
    pub reason: Option<String>,
}

impl RunSummary {
    /// Progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        self.succeeded_stages as f64 / self.total_stages as f64
    }
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        let halting = run.halting_result();
        RunSummary {
            run_id: run.run_id,
            pipeline_name: run.pipeline_name.clone(),
            status: run.status,
            started_at: run.started_at.unwrap_or_else(Utc::now),
            completed_at: run.completed_at,
            total_stages: run.total_stages,
            succeeded_stages: run.succeeded_stages(),
            halted_at: halting.map(|r| r.stage_id.clone()),
            reason: halting.and_then(|r| r.reason()),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary, replacing any with the same ID
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List all runs for a pipeline, newest first
    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>>;

    /// Most recent run of a pipeline
    async fn latest_run(&self, pipeline_name: &str) -> Result<Option<RunSummary>> {
        Ok(self.list_runs(pipeline_name).await?.into_iter().next())
    }

    /// Delete a run; deleting an unknown ID is not an error
    async fn delete_run(&self, run_id: Uuid) -> Result<()>;

    /// List all pipeline names, sorted
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<_> = runs
            .values()
            .filter(|r| r.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<()> {
        self.runs.write().await.remove(&run_id);
        Ok(())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<_> = runs.values().map(|r| r.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
