//! Persistence seam between the queue and its backing storage.
//!
//! [`JobStore`] and [`ReportStore`] are the only contracts the rest of the
//! system depends on. The durable implementation lives in the
//! `clusterwatch-sqlite` crate; [`memory::InMemoryStore`] backs tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::{JobId, JobStatus};

pub mod memory;

/// A job row as persisted, before payload deserialization.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: String,
    pub status: JobStatus,
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: u16,
}

/// A persisted report artifact. Read-only after creation except for
/// retention sweeps.
#[derive(Debug, Clone)]
pub struct Report {
    pub id: i64,
    pub cluster_name: String,
    pub generated_at: DateTime<Utc>,
    pub html: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// Aggregate statistics over stored reports for the active cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportStats {
    pub count: u64,
    pub total_bytes: u64,
    pub newest: Option<DateTime<Utc>>,
    pub oldest: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(JobId),
    #[error("invalid job status in storage: {0}")]
    InvalidStatus(String),
    #[error("storage failure: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn storage(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Storage(error.into())
    }
}

/// Storage contract for job records.
///
/// I/O failures are not retried here; they propagate to the caller, which
/// owns retry policy.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in `pending` status and return its id. Ids are assigned
    /// monotonically at creation.
    async fn insert_job(&self, kind: &str, payload: Option<String>) -> Result<JobId, StoreError>;

    /// The single oldest `pending` job by creation order, if any.
    async fn pending_job(&self) -> Result<Option<JobRecord>, StoreError>;

    /// Overwrite status, result and error. Sets `started_at` when entering
    /// `processing` and `completed_at` when entering a terminal state.
    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Atomically increment `retry_count` and reset the job to `pending`,
    /// returning the new count. The original `created_at` is kept, so a
    /// retried job stays ahead of newer arrivals in FIFO order.
    async fn increment_job_retry(&self, id: JobId) -> Result<u16, StoreError>;
}

/// Storage contract for report artifacts, scoped to the active cluster.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save_report(&self, html: &str) -> Result<i64, StoreError>;

    async fn latest_report(&self) -> Result<Option<Report>, StoreError>;

    /// Delete reports generated before `cutoff`, returning the number
    /// removed.
    async fn cleanup_old_reports(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn report_stats(&self) -> Result<ReportStats, StoreError>;
}
