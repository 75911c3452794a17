//! SQLite-based run history store

use crate::core::RunStatus;
use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        pipeline_name TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        total_stages INTEGER NOT NULL DEFAULT 0,
        succeeded_stages INTEGER NOT NULL DEFAULT 0,
        halted_at TEXT,
        reason TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_pipeline_name ON runs(pipeline_name)",
    "CREATE INDEX IF NOT EXISTS idx_started_at ON runs(started_at)",
];

const SELECT_COLUMNS: &str =
    "SELECT id, pipeline_name, status, started_at, completed_at, total_stages, succeeded_stages, halted_at, reason FROM runs";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (creating if needed) a database file
    pub async fn new(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Create an in-memory store
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        use sqlx::sqlite::SqlitePoolOptions;

        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Default database location under the user's data directory
    pub fn default_path() -> PathBuf {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        data_dir.join("stagegate").join("runs.db")
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        Self::open(&Self::default_path()).await
    }

    /// Open a store, creating its parent directory first
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn stage_count(row: &SqliteRow, column: &str) -> Result<usize> {
        let count: i64 = row.try_get(column)?;
        usize::try_from(count).with_context(|| format!("Invalid {} in history: {}", column, count))
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        let status: String = row.try_get("status")?;
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            pipeline_name: row.try_get("pipeline_name")?,
            status: RunStatus::from_str(&status).map_err(anyhow::Error::msg)?,
            started_at: Self::from_naive(row.try_get("started_at")?),
            completed_at: row
                .try_get::<Option<NaiveDateTime>, _>("completed_at")?
                .map(Self::from_naive),
            total_stages: Self::stage_count(row, "total_stages")?,
            succeeded_stages: Self::stage_count(row, "succeeded_stages")?,
            halted_at: row.try_get("halted_at")?,
            reason: row.try_get("reason")?,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_name, status, started_at, completed_at, total_stages, succeeded_stages, halted_at, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.pipeline_name)
        .bind(run.status.as_str())
        .bind(Self::to_naive(run.started_at))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(run.total_stages as i64)
        .bind(run.succeeded_stages as i64)
        .bind(run.halted_at.as_deref())
        .bind(run.reason.as_deref())
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!(
            "{} WHERE pipeline_name = ?1 ORDER BY started_at DESC",
            SELECT_COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn latest_run(&self, pipeline_name: &str) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!(
            "{} WHERE pipeline_name = ?1 ORDER BY started_at DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get latest run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete run")?;

        Ok(())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM runs
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("pipeline_name").map_err(anyhow::Error::from))
            .collect()
    }
}
