//! In-memory implementation of the store traits.
//!
//! Provided for testing purposes and not designed for use in a production
//! system. It is not optimized; instead it is designed to be a correct
//! implementation for use in a test setup.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::job::{JobId, JobStatus};

use super::{JobRecord, JobStore, Report, ReportStats, ReportStore, StoreError};

#[derive(Clone)]
pub struct InMemoryStore {
    cluster_name: Arc<str>,
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Inner {
    jobs: Vec<JobRecord>,
    reports: Vec<Report>,
    next_job_id: i64,
    next_report_id: i64,
    fail_next: bool,
}

impl InMemoryStore {
    /// Creates a new instance scoped to the `default` cluster.
    pub fn new() -> Self {
        Self::with_cluster("default")
    }

    pub fn with_cluster(cluster_name: &str) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            inner: Default::default(),
        }
    }

    /// Make the next store call fail with a storage error. Useful for
    /// exercising the worker's control-loop failure handling.
    pub fn fail_next_call(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_next = true;
        }
    }

    /// Snapshot of a single job record.
    pub fn job(&self, id: JobId) -> Option<JobRecord> {
        self.inner
            .lock()
            .ok()?
            .jobs
            .iter()
            .find(|job| job.id == id)
            .cloned()
    }

    /// Snapshot of all job records in insertion order.
    pub fn all_jobs(&self) -> Vec<JobRecord> {
        self.inner
            .lock()
            .map(|inner| inner.jobs.clone())
            .unwrap_or_default()
    }

    /// Number of jobs currently in `processing` status.
    pub fn processing_count(&self) -> usize {
        self.all_jobs()
            .iter()
            .filter(|job| job.status == JobStatus::Processing)
            .count()
    }

    /// Insert a report with an explicit generation timestamp, for exercising
    /// retention sweeps.
    pub fn insert_report_at(&self, html: &str, generated_at: DateTime<Utc>) -> i64 {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.next_report_id += 1;
        let id = inner.next_report_id;
        let cluster_name = self.cluster_name.to_string();
        inner.reports.push(Report {
            id,
            cluster_name,
            generated_at,
            html: html.to_owned(),
            size_bytes: html.len() as i64,
            created_at: Utc::now(),
        });
        id
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::storage("store mutex poisoned"))?;
        if inner.fail_next {
            inner.fail_next = false;
            return Err(StoreError::storage("injected storage failure"));
        }
        Ok(inner)
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert_job(&self, kind: &str, payload: Option<String>) -> Result<JobId, StoreError> {
        let mut inner = self.lock()?;
        inner.next_job_id += 1;
        let id = JobId::from(inner.next_job_id);
        inner.jobs.push(JobRecord {
            id,
            kind: kind.to_owned(),
            status: JobStatus::Pending,
            payload,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
        });
        Ok(id)
    }

    async fn pending_job(&self) -> Result<Option<JobRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .min_by_key(|job| (job.created_at, i64::from(job.id)))
            .cloned())
    }

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(StoreError::JobNotFound(id))?;
        job.status = status;
        job.result = result;
        job.error = error;
        if status == JobStatus::Processing {
            job.started_at = Some(Utc::now());
        } else if status.is_terminal() {
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn increment_job_retry(&self, id: JobId) -> Result<u16, StoreError> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(StoreError::JobNotFound(id))?;
        job.retry_count += 1;
        job.status = JobStatus::Pending;
        Ok(job.retry_count)
    }
}

#[async_trait]
impl ReportStore for InMemoryStore {
    async fn save_report(&self, html: &str) -> Result<i64, StoreError> {
        let mut inner = self.lock()?;
        inner.next_report_id += 1;
        let id = inner.next_report_id;
        let cluster_name = self.cluster_name.to_string();
        inner.reports.push(Report {
            id,
            cluster_name,
            generated_at: Utc::now(),
            html: html.to_owned(),
            size_bytes: html.len() as i64,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn latest_report(&self) -> Result<Option<Report>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .reports
            .iter()
            .filter(|report| *report.cluster_name == *self.cluster_name)
            .max_by_key(|report| report.generated_at)
            .cloned())
    }

    async fn cleanup_old_reports(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.reports.len();
        let cluster_name = self.cluster_name.clone();
        inner
            .reports
            .retain(|report| *report.cluster_name != *cluster_name || report.generated_at >= cutoff);
        Ok((before - inner.reports.len()) as u64)
    }

    async fn report_stats(&self) -> Result<ReportStats, StoreError> {
        let inner = self.lock()?;
        let reports = inner
            .reports
            .iter()
            .filter(|report| *report.cluster_name == *self.cluster_name);
        let mut stats = ReportStats::default();
        for report in reports {
            stats.count += 1;
            stats.total_bytes += report.size_bytes as u64;
            stats.newest = stats.newest.max(Some(report.generated_at));
            stats.oldest = match stats.oldest {
                None => Some(report.generated_at),
                Some(oldest) => Some(oldest.min(report.generated_at)),
            };
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeDelta;

    #[tokio::test]
    async fn pending_jobs_come_back_in_creation_order() {
        let store = InMemoryStore::new();
        let first = store.insert_job("generate_report", None).await.unwrap();
        let second = store.insert_job("generate_report", None).await.unwrap();
        let third = store.insert_job("generate_report", None).await.unwrap();

        for expected in [first, second, third] {
            let job = store.pending_job().await.unwrap().unwrap();
            assert_eq!(job.id, expected);
            store
                .update_job_status(job.id, JobStatus::Processing, None, None)
                .await
                .unwrap();
        }
        assert!(store.pending_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn default_store_is_scoped_to_the_default_cluster() {
        let store = InMemoryStore::default();
        store.save_report("<html/>").await.unwrap();

        let report = store.latest_report().await.unwrap().unwrap();
        assert_eq!(report.cluster_name, "default");
    }

    #[tokio::test]
    async fn insert_without_payload_dequeues_as_none() {
        let store = InMemoryStore::new();
        store.insert_job("generate_report", None).await.unwrap();

        let job = store.pending_job().await.unwrap().unwrap();
        assert_eq!(job.payload, None);
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn retried_job_keeps_its_place_in_line() {
        let store = InMemoryStore::new();
        let first = store.insert_job("generate_report", None).await.unwrap();
        store
            .update_job_status(first, JobStatus::Processing, None, None)
            .await
            .unwrap();
        let second = store.insert_job("generate_report", None).await.unwrap();

        let count = store.increment_job_retry(first).await.unwrap();
        assert_eq!(count, 1);

        // The retried job kept its original created_at, so it is dequeued
        // ahead of the newer job.
        let next = store.pending_job().await.unwrap().unwrap();
        assert_eq!(next.id, first);
        assert_eq!(next.retry_count, 1);
        store
            .update_job_status(first, JobStatus::Processing, None, None)
            .await
            .unwrap();
        assert_eq!(store.pending_job().await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn status_updates_stamp_timestamps() {
        let store = InMemoryStore::new();
        let id = store.insert_job("generate_report", None).await.unwrap();

        store
            .update_job_status(id, JobStatus::Processing, None, None)
            .await
            .unwrap();
        let job = store.job(id).unwrap();
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_none());

        store
            .update_job_status(id, JobStatus::Completed, Some("{}".into()), None)
            .await
            .unwrap();
        let job = store.job(id).unwrap();
        assert!(job.completed_at.is_some());
        assert_eq!(job.result.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn unknown_job_id_errors() {
        let store = InMemoryStore::new();
        assert_matches!(
            store
                .update_job_status(JobId::from(42), JobStatus::Failed, None, None)
                .await,
            Err(StoreError::JobNotFound(_))
        );
        assert_matches!(
            store.increment_job_retry(JobId::from(42)).await,
            Err(StoreError::JobNotFound(_))
        );
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert_report_at("<html>old</html>", now - TimeDelta::weeks(4));
        store.insert_report_at("<html>new</html>", now);

        let cutoff = now - TimeDelta::weeks(2);
        assert_eq!(store.cleanup_old_reports(cutoff).await.unwrap(), 1);
        assert_eq!(store.cleanup_old_reports(cutoff).await.unwrap(), 0);

        let latest = store.latest_report().await.unwrap().unwrap();
        assert_eq!(latest.html, "<html>new</html>");
    }

    #[tokio::test]
    async fn stats_cover_only_the_active_cluster() {
        let store = InMemoryStore::with_cluster("prod");
        store.save_report("<html>a</html>").await.unwrap();
        store.save_report("<html>bb</html>").await.unwrap();

        let stats = store.report_stats().await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_bytes, 14 + 15);
        assert!(stats.newest >= stats.oldest);

        let empty = InMemoryStore::with_cluster("staging")
            .report_stats()
            .await
            .unwrap();
        assert_eq!(empty, ReportStats::default());
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = InMemoryStore::new();
        store.fail_next_call();
        assert_matches!(store.pending_job().await, Err(StoreError::Storage(_)));
        assert_matches!(store.pending_job().await, Ok(None));
    }
}
