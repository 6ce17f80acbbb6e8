use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub struct JobId(i64);

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<JobId> for i64 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of job types.
///
/// The discriminator is stored as a string so that new variants can be added
/// without a schema change; dispatch to executors goes through
/// [`crate::executor::ExecutorRegistry`], which fails unknown tags rather
/// than panicking on them.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub enum JobKind {
    GenerateReport,
}

impl JobKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GenerateReport => "generate_report",
        }
    }
}

impl Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job type: {0}")]
pub struct UnknownJobKind(pub String);

impl FromStr for JobKind {
    type Err = UnknownJobKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate_report" => Ok(Self::GenerateReport),
            other => Err(UnknownJobKind(other.to_owned())),
        }
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// pending -> processing -> completed
///                       -> pending   (failed, retries remaining)
///                       -> failed    (failed, retries exhausted)
/// ```
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("invalid job status: {0}")]
pub struct InvalidJobStatus(pub String);

impl FromStr for JobStatus {
    type Err = InvalidJobStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(InvalidJobStatus(other.to_owned())),
        }
    }
}

/// A unit of deferred work, as handed to the worker by the queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// Raw discriminator as stored; resolved to a [`JobKind`] at dispatch.
    pub kind: String,
    pub status: JobStatus,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u16,
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn job_kind_round_trips_through_storage_form() {
        let kind: JobKind = JobKind::GenerateReport.as_str().parse().unwrap();
        assert_eq!(kind, JobKind::GenerateReport);
    }

    #[test]
    fn unknown_job_kind_is_rejected() {
        assert_matches!("resize_cluster".parse::<JobKind>(), Err(UnknownJobKind(raw)) if raw == "resize_cluster");
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }
}
