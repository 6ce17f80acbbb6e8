use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::prelude::FromRow;

use clusterwatch::job::JobStatus;
use clusterwatch::store::{JobRecord, Report, ReportStats, StoreError};

/// Timestamps are stored as fixed-width RFC 3339 text so that string
/// comparison in SQL matches chronological order.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(StoreError::storage)
}

fn decode_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(decode_ts).transpose()
}

#[derive(Debug, FromRow)]
pub(crate) struct JobRow {
    pub id: i64,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub status: String,
    pub payload: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: i64,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = StoreError;

    fn try_from(value: JobRow) -> Result<Self, Self::Error> {
        let status = value
            .status
            .parse::<JobStatus>()
            .map_err(|err| StoreError::InvalidStatus(err.0))?;
        Ok(Self {
            id: value.id.into(),
            kind: value.kind,
            status,
            payload: value.payload,
            created_at: decode_ts(&value.created_at)?,
            started_at: decode_opt_ts(value.started_at.as_deref())?,
            completed_at: decode_opt_ts(value.completed_at.as_deref())?,
            result: value.result,
            error: value.error,
            retry_count: u16::try_from(value.retry_count)
                .map_err(|_| StoreError::storage("retry_count out of range"))?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ReportRow {
    pub id: i64,
    pub cluster_name: String,
    pub generated_at: String,
    pub report_html: String,
    pub report_size: i64,
    pub created_at: String,
}

impl TryFrom<ReportRow> for Report {
    type Error = StoreError;

    fn try_from(value: ReportRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            cluster_name: value.cluster_name,
            generated_at: decode_ts(&value.generated_at)?,
            html: value.report_html,
            size_bytes: value.report_size,
            created_at: decode_ts(&value.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct StatsRow {
    pub count: i64,
    pub total_bytes: i64,
    pub newest: Option<String>,
    pub oldest: Option<String>,
}

impl TryFrom<StatsRow> for ReportStats {
    type Error = StoreError;

    fn try_from(value: StatsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            count: value.count.max(0) as u64,
            total_bytes: value.total_bytes.max(0) as u64,
            newest: decode_opt_ts(value.newest.as_deref())?,
            oldest: decode_opt_ts(value.oldest.as_deref())?,
        })
    }
}
