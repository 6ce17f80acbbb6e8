//! The scheduler: a long-lived loop that polls the queue and drives job
//! state transitions.
//!
//! One worker runs per process; it dequeues a single job at a time, marks it
//! `processing` before execution starts (so a crash mid-run leaves a visibly
//! stuck job rather than silently reprocessing), dispatches it to an
//! isolated task, and applies retry policy on failure. The persisted status
//! is the only record of what is running; there is no in-memory flag to lose
//! on restart.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::executor::{ExecutorRegistry, JobError};
use crate::job::Job;
use crate::queue::JobQueue;
use crate::store::{JobStore, StoreError};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delay between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Automatic retries granted to a failing job before it is failed
    /// terminally.
    pub max_retries: u16,
    /// Pause after a failure in the loop's own control logic, to avoid a
    /// tight error loop.
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_retries: 3,
            error_backoff: Duration::from_secs(5),
        }
    }
}

pub struct Worker<S> {
    queue: Arc<JobQueue<S>>,
    registry: Arc<ExecutorRegistry>,
    config: WorkerConfig,
}

impl<S> Worker<S>
where
    S: JobStore + 'static,
{
    pub fn new(queue: Arc<JobQueue<S>>, registry: ExecutorRegistry, config: WorkerConfig) -> Self {
        Self {
            queue,
            registry: Arc::new(registry),
            config,
        }
    }

    /// Spawn the worker loop on the runtime.
    pub fn spawn(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancellation_token))
    }

    /// Run the scheduling loop until the cancellation token fires.
    ///
    /// Cancellation is observed between jobs and during sleeps; a job
    /// already dispatched runs to its own completion and is never forcibly
    /// interrupted here.
    pub async fn run(self, cancellation_token: CancellationToken) {
        info!(
            poll_interval = ?self.config.poll_interval,
            max_retries = self.config.max_retries,
            "worker started"
        );

        loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            let pause = match self.tick().await {
                // A job was processed; check for more work immediately.
                Ok(true) => continue,
                Ok(false) => self.config.poll_interval,
                Err(err) => {
                    error!(error = %err, "worker loop error");
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("worker shutting down");
    }

    /// One scheduler iteration. `Ok(true)` when a job was processed.
    ///
    /// Errors returned here come from the queue/store calls, not from job
    /// execution; execution outcomes are always captured into job state.
    async fn tick(&self) -> Result<bool, StoreError> {
        let Some(job) = self.queue.next_job().await? else {
            return Ok(false);
        };

        info!(
            job_id = %job.id,
            job_type = %job.kind,
            retry_count = job.retry_count,
            "worker processing job"
        );
        self.queue.mark_processing(job.id).await?;

        match self.dispatch(&job).await {
            Ok(result) => {
                self.queue.mark_completed(job.id, result).await?;
            }
            Err(job_error) => {
                let should_retry = job.retry_count < self.config.max_retries;
                error!(
                    job_id = %job.id,
                    job_type = %job.kind,
                    error = %job_error,
                    retry_count = job.retry_count,
                    will_retry = should_retry,
                    "worker job failed"
                );
                self.queue
                    .mark_failed(job.id, &job_error.to_string(), should_retry)
                    .await?;
            }
        }

        Ok(true)
    }

    /// Execute the job in its own task so that a panic or long runtime
    /// cannot corrupt the scheduler, and the process stays free to serve
    /// liveness checks while the job runs.
    async fn dispatch(&self, job: &Job) -> Result<Value, JobError> {
        let executor = self.registry.resolve(&job.kind)?;
        let handle = tokio::spawn({
            let job = job.clone();
            async move { executor.execute(job).await }
        });
        match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(join_error.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::executor::JobExecutor;
    use crate::job::{JobKind, JobStatus};
    use crate::store::memory::InMemoryStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;

    fn worker(store: InMemoryStore, registry: ExecutorRegistry) -> Worker<InMemoryStore> {
        Worker::new(
            Arc::new(JobQueue::new(store)),
            registry,
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                max_retries: 3,
                error_backoff: Duration::from_millis(50),
            },
        )
    }

    struct FailingExecutor;

    #[async_trait]
    impl JobExecutor for FailingExecutor {
        fn kind(&self) -> JobKind {
            JobKind::GenerateReport
        }

        async fn execute(&self, _job: Job) -> Result<Value, JobError> {
            Err(JobError::new("TransportError", "connection refused"))
        }
    }

    struct SucceedingExecutor;

    #[async_trait]
    impl JobExecutor for SucceedingExecutor {
        fn kind(&self) -> JobKind {
            JobKind::GenerateReport
        }

        async fn execute(&self, _job: Job) -> Result<Value, JobError> {
            Ok(json!({"status": "success", "report_id": 1}))
        }
    }

    struct PanickingExecutor;

    #[async_trait]
    impl JobExecutor for PanickingExecutor {
        fn kind(&self) -> JobKind {
            JobKind::GenerateReport
        }

        async fn execute(&self, _job: Job) -> Result<Value, JobError> {
            panic!("executor blew up")
        }
    }

    /// Asserts, from inside job execution, that it is the only job in
    /// `processing` status.
    struct ExclusivityProbe {
        store: InMemoryStore,
    }

    #[async_trait]
    impl JobExecutor for ExclusivityProbe {
        fn kind(&self) -> JobKind {
            JobKind::GenerateReport
        }

        async fn execute(&self, _job: Job) -> Result<Value, JobError> {
            assert_eq!(self.store.processing_count(), 1);
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn successful_job_is_marked_completed_with_result() {
        let store = InMemoryStore::new();
        let registry = ExecutorRegistry::new().register(Arc::new(SucceedingExecutor));
        let worker = worker(store.clone(), registry);
        let queue = JobQueue::new(store.clone());

        let id = queue.enqueue(JobKind::GenerateReport, None).await.unwrap();
        assert!(worker.tick().await.unwrap());

        let record = store.job(id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.result.as_deref().unwrap().contains("success"));
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn always_failing_job_exhausts_retries_then_fails_terminally() {
        let store = InMemoryStore::new();
        let registry = ExecutorRegistry::new().register(Arc::new(FailingExecutor));
        let worker = worker(store.clone(), registry);
        let queue = JobQueue::new(store.clone());

        let id = queue.enqueue(JobKind::GenerateReport, None).await.unwrap();

        // Attempts 1 through 3 recycle the job back to pending.
        for expected_retries in 1..=3 {
            assert!(worker.tick().await.unwrap());
            let record = store.job(id).unwrap();
            assert_eq!(record.status, JobStatus::Pending);
            assert_eq!(record.retry_count, expected_retries);
        }

        // Attempt 4: retry_count == max_retries, the failure is terminal.
        assert!(worker.tick().await.unwrap());
        let record = store.job(id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.retry_count, 3);
        assert_eq!(
            record.error.as_deref(),
            Some("TransportError: connection refused")
        );
        assert!(!worker.tick().await.unwrap());
    }

    #[tokio::test]
    async fn retried_job_runs_before_later_arrivals() {
        let store = InMemoryStore::new();
        let registry = ExecutorRegistry::new().register(Arc::new(FailingExecutor));
        let worker = worker(store.clone(), registry);
        let queue = JobQueue::new(store.clone());

        let first = queue.enqueue(JobKind::GenerateReport, None).await.unwrap();
        assert!(worker.tick().await.unwrap());
        let second = queue.enqueue(JobKind::GenerateReport, None).await.unwrap();

        // The retried job kept its original creation time and is picked
        // ahead of the job enqueued after the retry.
        let next = queue.next_job().await.unwrap().unwrap();
        assert_eq!(next.id, first);
        assert_eq!(next.retry_count, 1);
        assert_eq!(store.job(second).unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn unknown_job_type_fails_through_retry_policy() {
        let store = InMemoryStore::new();
        let registry = ExecutorRegistry::new().register(Arc::new(SucceedingExecutor));
        let worker = worker(store.clone(), registry);

        let id = store.insert_job("resize_cluster", None).await.unwrap();
        for _ in 0..4 {
            assert!(worker.tick().await.unwrap());
        }

        let record = store.job(id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.as_deref().unwrap().starts_with("UnknownJobType:"));
    }

    #[tokio::test]
    async fn executor_panic_is_captured_as_a_job_failure() {
        let store = InMemoryStore::new();
        let registry = ExecutorRegistry::new().register(Arc::new(PanickingExecutor));
        let worker = worker(store.clone(), registry);
        let queue = JobQueue::new(store.clone());

        let id = queue.enqueue(JobKind::GenerateReport, None).await.unwrap();
        assert!(worker.tick().await.unwrap());

        let record = store.job(id).unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.retry_count, 1);

        // The panic never escaped dispatch; the worker can keep going.
        assert!(worker.tick().await.unwrap());
    }

    #[tokio::test]
    async fn at_most_one_job_processing_at_a_time() {
        let store = InMemoryStore::new();
        let registry = ExecutorRegistry::new().register(Arc::new(ExclusivityProbe {
            store: store.clone(),
        }));
        let worker = worker(store.clone(), registry);
        let queue = JobQueue::new(store.clone());

        queue.enqueue(JobKind::GenerateReport, None).await.unwrap();
        queue.enqueue(JobKind::GenerateReport, None).await.unwrap();

        assert!(worker.tick().await.unwrap());
        assert!(worker.tick().await.unwrap());
        assert_eq!(store.processing_count(), 0);
    }

    #[tokio::test]
    async fn control_loop_failure_surfaces_from_tick() {
        let store = InMemoryStore::new();
        let registry = ExecutorRegistry::new().register(Arc::new(SucceedingExecutor));
        let worker = worker(store.clone(), registry);

        store.fail_next_call();
        assert_matches!(worker.tick().await, Err(StoreError::Storage(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_survives_a_control_failure_and_recovers() {
        let store = InMemoryStore::new();
        let registry = ExecutorRegistry::new().register(Arc::new(SucceedingExecutor));
        let worker = worker(store.clone(), registry);
        let queue = JobQueue::new(store.clone());

        let id = queue.enqueue(JobKind::GenerateReport, None).await.unwrap();
        store.fail_next_call();

        let token = CancellationToken::new();
        let handle = worker.spawn(token.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store
                    .job(id)
                    .is_some_and(|record| record.status == JobStatus::Completed)
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker should recover after the injected failure");

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_an_idle_worker() {
        let store = InMemoryStore::new();
        let registry = ExecutorRegistry::new().register(Arc::new(SucceedingExecutor));
        let worker = worker(store, registry);

        let token = CancellationToken::new();
        let handle = worker.spawn(token.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly on cancellation")
            .unwrap();
    }
}
