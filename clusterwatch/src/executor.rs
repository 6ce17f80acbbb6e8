use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinError;

use crate::job::{Job, JobKind};

/// A unit of job business logic.
///
/// Executors run in their own task, isolated from the worker loop: they
/// return a structured result or a structured failure and never leak partial
/// side effects as success.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// The job type this executor handles.
    fn kind(&self) -> JobKind;

    /// Run one job to completion.
    async fn execute(&self, job: Job) -> Result<Value, JobError>;
}

/// A structured job failure, persisted as `"<kind>: <message>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobError {
    pub kind: String,
    pub message: String,
}

impl JobError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    fn unknown_kind(raw: &str) -> Self {
        Self::new(
            "UnknownJobType",
            format!("no executor registered for job type {raw:?}"),
        )
    }
}

impl Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for JobError {}

impl From<JoinError> for JobError {
    fn from(value: JoinError) -> Self {
        let msg = value.to_string();
        let message = match value.try_into_panic() {
            Ok(panic) => panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or(msg),
            Err(_) => msg,
        };
        Self::new("Panic", message)
    }
}

/// Maps job tags to executor implementations.
///
/// Dispatch on an unregistered or unparseable tag fails the job with an
/// unknown-type error instead of panicking.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<JobKind, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.executors.insert(executor.kind(), executor);
        self
    }

    pub fn resolve(&self, raw: &str) -> Result<Arc<dyn JobExecutor>, JobError> {
        raw.parse::<JobKind>()
            .ok()
            .and_then(|kind| self.executors.get(&kind).cloned())
            .ok_or_else(|| JobError::unknown_kind(raw))
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) struct StaticExecutor {
        pub outcome: Result<Value, JobError>,
    }

    #[async_trait]
    impl JobExecutor for StaticExecutor {
        fn kind(&self) -> JobKind {
            JobKind::GenerateReport
        }

        async fn execute(&self, _job: Job) -> Result<Value, JobError> {
            self.outcome.clone()
        }
    }

    #[test]
    fn job_error_renders_kind_and_message() {
        let error = JobError::new("TransportError", "connection refused");
        assert_eq!(error.to_string(), "TransportError: connection refused");
    }

    #[test]
    fn resolve_known_kind() {
        let registry = ExecutorRegistry::new().register(Arc::new(StaticExecutor {
            outcome: Ok(Value::Null),
        }));
        assert!(registry.resolve("generate_report").is_ok());
    }

    #[test]
    fn resolve_unknown_kind_fails_with_unknown_type() {
        let registry = ExecutorRegistry::new();
        let error = registry
            .resolve("resize_cluster")
            .map(|_| ())
            .unwrap_err();
        assert_eq!(error.kind, "UnknownJobType");
        assert!(error.message.contains("resize_cluster"));
    }

    #[tokio::test]
    async fn panic_in_spawned_task_becomes_a_job_error() {
        let join_error = tokio::spawn(async { panic!("executor blew up") })
            .await
            .unwrap_err();
        let error = JobError::from(join_error);
        assert_eq!(error.kind, "Panic");
        assert!(error.message.contains("executor blew up"));
    }
}
