//! SQLite-backed implementation of the clusterwatch store traits.
//!
//! One file holds both the job queue and the report archive; the schema is
//! created idempotently on startup. A single pooled connection is used
//! because SQLite permits one writer at a time, which also keeps every
//! statement serialized without explicit locking.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use clusterwatch::job::{JobId, JobStatus};
use clusterwatch::store::{
    JobRecord, JobStore, Report, ReportStats, ReportStore, StoreError,
};

mod types;
use types::{encode_ts, JobRow, ReportRow, StatsRow};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    cluster_name: String,
}

impl SqliteStore {
    /// Open (creating if missing) the database file at `path`, scoped to the
    /// given cluster.
    pub async fn connect(path: impl AsRef<Path>, cluster_name: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::with_options(options, cluster_name).await
    }

    /// An in-memory database, primarily for tests.
    pub async fn in_memory(cluster_name: &str) -> Result<Self, StoreError> {
        let options = "sqlite::memory:"
            .parse::<SqliteConnectOptions>()
            .map_err(StoreError::storage)?;
        Self::with_options(options, cluster_name).await
    }

    async fn with_options(
        options: SqliteConnectOptions,
        cluster_name: &str,
    ) -> Result<Self, StoreError> {
        // A single long-lived connection: SQLite has one writer anyway, and
        // an in-memory database vanishes when its connection closes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StoreError::storage)?;
        Ok(Self {
            pool,
            cluster_name: cluster_name.to_owned(),
        })
    }

    /// Idempotently create tables and indexes. Safe to call on every process
    /// start; a failure here is fatal to startup.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cluster_name TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                report_html TEXT NOT NULL,
                report_size INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_reports_cluster_generated
            ON reports(cluster_name, generated_at DESC)"#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                result TEXT,
                error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_jobs_status_created
            ON jobs(status, created_at ASC)"#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        info!("database initialized");
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_job(&self, kind: &str, payload: Option<String>) -> Result<JobId, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO jobs (type, status, payload, created_at)
            VALUES (?, 'pending', ?, ?)
            RETURNING id"#,
        )
        .bind(kind)
        .bind(payload)
        .bind(encode_ts(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        info!(job_id = id, job_type = kind, "job inserted");
        Ok(id.into())
    }

    async fn pending_job(&self) -> Result<Option<JobRecord>, StoreError> {
        sqlx::query_as::<_, JobRow>(
            r#"SELECT id, type, status, payload, created_at, started_at,
                completed_at, result, error, retry_count
            FROM jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC, id ASC
            LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::storage)?
        .map(JobRecord::try_from)
        .transpose()
    }

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        // started_at marks entry into processing; completed_at only terminal
        // states.
        let query = if status == JobStatus::Processing {
            sqlx::query(
                r#"UPDATE jobs
                SET status = ?, result = ?, error = ?, started_at = ?
                WHERE id = ?"#,
            )
            .bind(status.as_str())
            .bind(result)
            .bind(error)
            .bind(encode_ts(Utc::now()))
            .bind(i64::from(id))
        } else if status.is_terminal() {
            sqlx::query(
                r#"UPDATE jobs
                SET status = ?, result = ?, error = ?, completed_at = ?
                WHERE id = ?"#,
            )
            .bind(status.as_str())
            .bind(result)
            .bind(error)
            .bind(encode_ts(Utc::now()))
            .bind(i64::from(id))
        } else {
            sqlx::query(
                r#"UPDATE jobs
                SET status = ?, result = ?, error = ?
                WHERE id = ?"#,
            )
            .bind(status.as_str())
            .bind(result)
            .bind(error)
            .bind(i64::from(id))
        };

        let outcome = query
            .execute(&self.pool)
            .await
            .map_err(StoreError::storage)?;

        if outcome.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }

        info!(job_id = %id, status = status.as_str(), "job status updated");
        Ok(())
    }

    async fn increment_job_retry(&self, id: JobId) -> Result<u16, StoreError> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"UPDATE jobs
            SET retry_count = retry_count + 1, status = 'pending'
            WHERE id = ?
            RETURNING retry_count"#,
        )
        .bind(i64::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        let count = count.ok_or(StoreError::JobNotFound(id))?;
        let count =
            u16::try_from(count).map_err(|_| StoreError::storage("retry_count out of range"))?;
        info!(job_id = %id, retry_count = count, "job retry incremented");
        Ok(count)
    }
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn save_report(&self, html: &str) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO reports (cluster_name, generated_at, report_html, report_size, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id"#,
        )
        .bind(&self.cluster_name)
        .bind(encode_ts(Utc::now()))
        .bind(html)
        .bind(html.len() as i64)
        .bind(encode_ts(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        info!(
            report_id = id,
            size = html.len(),
            cluster = %self.cluster_name,
            "report saved"
        );
        Ok(id)
    }

    async fn latest_report(&self) -> Result<Option<Report>, StoreError> {
        sqlx::query_as::<_, ReportRow>(
            r#"SELECT id, cluster_name, generated_at, report_html, report_size, created_at
            FROM reports
            WHERE cluster_name = ?
            ORDER BY generated_at DESC
            LIMIT 1"#,
        )
        .bind(&self.cluster_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::storage)?
        .map(Report::try_from)
        .transpose()
    }

    async fn cleanup_old_reports(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let outcome = sqlx::query(
            r#"DELETE FROM reports
            WHERE cluster_name = ? AND generated_at < ?"#,
        )
        .bind(&self.cluster_name)
        .bind(encode_ts(cutoff))
        .execute(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        let deleted = outcome.rows_affected();
        info!(
            deleted_count = deleted,
            cutoff = %cutoff,
            "old reports cleaned"
        );
        Ok(deleted)
    }

    async fn report_stats(&self) -> Result<ReportStats, StoreError> {
        sqlx::query_as::<_, StatsRow>(
            r#"SELECT
                COUNT(*) AS count,
                COALESCE(SUM(report_size), 0) AS total_bytes,
                MAX(generated_at) AS newest,
                MIN(generated_at) AS oldest
            FROM reports
            WHERE cluster_name = ?"#,
        )
        .bind(&self.cluster_name)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::storage)?
        .try_into()
    }
}
