//! Typed façade over the job store.
//!
//! The queue owns payload/result JSON handling and emits the structured
//! lifecycle events; it implements no scheduling policy of its own. Swapping
//! the storage mechanism means swapping the store handed to [`JobQueue`],
//! nothing else.

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::job::{Job, JobId, JobKind};
use crate::store::{JobStore, StoreError};

pub struct JobQueue<S> {
    store: S,
}

impl<S> JobQueue<S>
where
    S: JobStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Add a new job to the queue and return its id. Never blocks on
    /// execution.
    pub async fn enqueue(&self, kind: JobKind, payload: Option<Value>) -> Result<JobId, StoreError> {
        let payload = payload.map(|payload| payload.to_string());
        let id = self.store.insert_job(kind.as_str(), payload).await?;
        info!(job_id = %id, job_type = %kind, "job enqueued");
        Ok(id)
    }

    /// The next pending job, or `None` when the queue is empty.
    ///
    /// A malformed stored payload is logged and surfaced as `payload = None`
    /// rather than failing the dequeue; corrupt data must not stall the
    /// queue.
    pub async fn next_job(&self) -> Result<Option<Job>, StoreError> {
        let Some(record) = self.store.pending_job().await? else {
            return Ok(None);
        };

        let payload = record.payload.as_deref().and_then(|raw| {
            serde_json::from_str(raw)
                .inspect_err(|error| {
                    warn!(job_id = %record.id, %error, "invalid job payload, treating as empty");
                })
                .ok()
        });

        let job = Job {
            id: record.id,
            kind: record.kind,
            status: record.status,
            payload,
            created_at: record.created_at,
            retry_count: record.retry_count,
        };
        debug!(job_id = %job.id, job_type = %job.kind, "job retrieved");
        Ok(Some(job))
    }

    /// Mark a job as currently being processed.
    pub async fn mark_processing(&self, id: JobId) -> Result<(), StoreError> {
        self.store
            .update_job_status(id, crate::job::JobStatus::Processing, None, None)
            .await?;
        info!(job_id = %id, "job marked processing");
        Ok(())
    }

    /// Mark a job as successfully completed with its result.
    pub async fn mark_completed(&self, id: JobId, result: Value) -> Result<(), StoreError> {
        self.store
            .update_job_status(
                id,
                crate::job::JobStatus::Completed,
                Some(result.to_string()),
                None,
            )
            .await?;
        info!(job_id = %id, "job completed");
        Ok(())
    }

    /// Mark a job as failed. With `retry` the job is recycled back to
    /// `pending` and its retry count incremented; otherwise the failure is
    /// terminal and the error text recorded.
    pub async fn mark_failed(&self, id: JobId, error: &str, retry: bool) -> Result<(), StoreError> {
        if retry {
            let retry_count = self.store.increment_job_retry(id).await?;
            warn!(job_id = %id, error, retry_count, "job failed, will retry");
        } else {
            self.store
                .update_job_status(id, crate::job::JobStatus::Failed, None, Some(error.to_owned()))
                .await?;
            error!(job_id = %id, error, "job failed");
        }
        Ok(())
    }
}
