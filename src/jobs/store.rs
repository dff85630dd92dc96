//! Durable job storage
//!
//! The queue keeps live jobs in memory and writes every state change through
//! a [`JobStore`]. On start, unfinished jobs are read back and re-queued.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use super::types::ScrapeJob;
use crate::error::{ScrapeError, ScrapeResult};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the job record
    async fn save(&self, job: &ScrapeJob) -> ScrapeResult<()>;
    async fn load(&self, id: Uuid) -> ScrapeResult<Option<ScrapeJob>>;
    /// Pending and in-progress jobs, oldest first
    async fn load_unfinished(&self) -> ScrapeResult<Vec<ScrapeJob>>;
    /// Delete terminal jobs finished before `cutoff`; returns how many
    async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> ScrapeResult<u64>;
}

/// Non-durable store for tests and single-shot runs
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: DashMap<Uuid, ScrapeJob>,
}

impl MemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &ScrapeJob) -> ScrapeResult<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> ScrapeResult<Option<ScrapeJob>> {
        Ok(self.jobs.get(&id).map(|j| j.clone()))
    }

    async fn load_unfinished(&self) -> ScrapeResult<Vec<ScrapeJob>> {
        let mut jobs: Vec<ScrapeJob> = self
            .jobs
            .iter()
            .filter(|j| !j.status.is_terminal())
            .map(|j| j.clone())
            .collect();
        jobs.sort_by_key(|j| j.enqueued_at);
        Ok(jobs)
    }

    async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> ScrapeResult<u64> {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, j| !(j.status.is_terminal() && j.finished_at.is_some_and(|t| t < cutoff)));
        Ok((before - self.jobs.len()) as u64)
    }
}

const JOBS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS scrape_jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL,
    enqueued_at INTEGER NOT NULL,
    finished_at INTEGER,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scrape_jobs_status ON scrape_jobs(status);
"#;

/// SQLite-backed job store (WAL mode)
///
/// The full job is stored as JSON in `body`; `status` and the timestamps
/// are duplicated into columns for recovery and pruning queries.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open or create the database at `path`
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = open_pool(path).await?;
        sqlx::query(JOBS_SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("Failed to initialize job schema")?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Shared connection setup for the sqlite stores
pub(crate) async fn open_pool(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30));

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open SQLite database {}", path.display()))
}

fn decode(body: &str) -> ScrapeResult<ScrapeJob> {
    serde_json::from_str(body).map_err(|e| ScrapeError::Storage(format!("corrupt job record: {e}")))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, job: &ScrapeJob) -> ScrapeResult<()> {
        let body = serde_json::to_string(job).map_err(|e| ScrapeError::Storage(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO scrape_jobs (id, status, priority, enqueued_at, finished_at, body)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                finished_at = excluded.finished_at,
                body = excluded.body
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(job.enqueued_at.timestamp_millis())
        .bind(job.finished_at.map(|t| t.timestamp_millis()))
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> ScrapeResult<Option<ScrapeJob>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT body FROM scrape_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(body,)| decode(&body)).transpose()
    }

    async fn load_unfinished(&self) -> ScrapeResult<Vec<ScrapeJob>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM scrape_jobs WHERE status IN ('pending', 'in_progress') ORDER BY enqueued_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|(body,)| decode(body)).collect()
    }

    async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> ScrapeResult<u64> {
        let result = sqlx::query(
            "DELETE FROM scrape_jobs WHERE status IN ('completed', 'failed') AND finished_at < ?",
        )
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
