//! The `generate_report` job: generate, archive, summarize, deliver.
//!
//! Generation and delivery are behind traits so the pipeline is testable
//! without a subprocess or a Slack workspace. Failures are structured by
//! stage so the persisted job error names where the pipeline broke.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{info, warn};

use clusterwatch::executor::{JobError, JobExecutor};
use clusterwatch::job::{Job, JobKind};
use clusterwatch::store::{ReportStore, StoreError};

/// Produces the report document and its generation metadata.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self) -> anyhow::Result<GeneratedReport>;

    /// Release any resources held by the last generation run. Called after
    /// every run, successful or not.
    async fn cleanup(&self) -> anyhow::Result<()>;
}

/// Delivers a finished report to its destination.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, html: &str, filename: &str, message: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReport {
    pub html: String,
    pub metadata: GenerationMetadata,
}

/// Which data sources the generation run used or failed to use. Every field
/// defaults so a generator that reports nothing still parses.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerationMetadata {
    #[serde(default)]
    pub k8s_tools_used: Vec<String>,
    #[serde(default)]
    pub prom_tools_used: Vec<String>,
    #[serde(default)]
    pub prom_tools_failed: Vec<ToolFailure>,
    #[serde(default)]
    pub tools_failed: Vec<ToolFailure>,
    #[serde(default)]
    pub total_tool_calls: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolFailure {
    pub tool: String,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
enum ReportError {
    #[error("report generation failed: {0}")]
    Generation(String),
    #[error("report generation timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("report delivery failed: {0}")]
    Delivery(String),
}

impl ReportError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Generation(_) => "GenerationError",
            Self::Timeout(_) => "TimeoutError",
            Self::Store(_) => "StorageError",
            Self::Delivery(_) => "DeliveryError",
        }
    }
}

impl From<ReportError> for JobError {
    fn from(value: ReportError) -> Self {
        JobError::new(value.kind(), value.to_string())
    }
}

pub struct GenerateReport<G, K, S> {
    generator: G,
    sink: K,
    store: S,
    cluster_name: String,
    client_name: String,
    timeout: Duration,
}

impl<G, K, S> GenerateReport<G, K, S>
where
    G: ReportGenerator,
    K: ReportSink,
    S: ReportStore,
{
    pub fn new(
        generator: G,
        sink: K,
        store: S,
        cluster_name: impl Into<String>,
        client_name: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            sink,
            store,
            cluster_name: cluster_name.into(),
            client_name: client_name.into(),
            timeout,
        }
    }

    async fn run_pipeline(&self) -> Result<Value, ReportError> {
        let started = Instant::now();

        let report = tokio::time::timeout(self.timeout, self.generator.generate())
            .await
            .map_err(|_| ReportError::Timeout(self.timeout))?
            .map_err(|err| ReportError::Generation(err.to_string()))?;

        let generation_time = started.elapsed();
        info!(
            generation_time_seconds = generation_time.as_secs_f64(),
            report_size_kb = report.html.len() as f64 / 1024.0,
            "report generated"
        );

        let report_id = self.store.save_report(&report.html).await?;
        info!(report_id, "report saved");

        let message = summary_message(&self.cluster_name, &report.metadata, generation_time);
        let filename = format!(
            "k8s-report-{}-{}-{}.html",
            self.client_name,
            self.cluster_name,
            Utc::now().format("%Y%m%d-%H%M"),
        );
        self.sink
            .deliver(&report.html, &filename, &message)
            .await
            .map_err(|err| ReportError::Delivery(err.to_string()))?;
        info!(filename, "report delivered");

        Ok(json!({
            "status": "success",
            "report_id": report_id,
            "generation_time_seconds": generation_time.as_secs_f64(),
            "report_size_kb": report.html.len() as f64 / 1024.0,
        }))
    }
}

#[async_trait]
impl<G, K, S> JobExecutor for GenerateReport<G, K, S>
where
    G: ReportGenerator,
    K: ReportSink,
    S: ReportStore,
{
    fn kind(&self) -> JobKind {
        JobKind::GenerateReport
    }

    async fn execute(&self, _job: Job) -> Result<Value, JobError> {
        let outcome = self.run_pipeline().await;
        if let Err(err) = self.generator.cleanup().await {
            warn!(error = %err, "generator cleanup failed");
        }
        outcome.map_err(JobError::from)
    }
}

fn truncated(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_owned()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{cut}...")
    }
}

fn sorted_unique(tools: &[String]) -> String {
    let set: BTreeSet<&str> = tools.iter().map(String::as_str).collect();
    set.into_iter().collect::<Vec<_>>().join(", ")
}

/// Human-readable summary of which data sources the report drew on, sent
/// alongside the delivered report.
pub fn summary_message(
    cluster_name: &str,
    metadata: &GenerationMetadata,
    generation_time: Duration,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "*Weekly Health Report - {cluster_name}*");
    let _ = writeln!(
        out,
        "Generated at: {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(
        out,
        "Generation time: {:.1}s",
        generation_time.as_secs_f64()
    );
    out.push('\n');
    let _ = writeln!(out, "*Data Sources:*");

    if !metadata.k8s_tools_used.is_empty() {
        let _ = writeln!(
            out,
            "Kubernetes API: {} tool types used",
            metadata.k8s_tools_used.len()
        );
        let _ = writeln!(out, "   - Tools: {}", sorted_unique(&metadata.k8s_tools_used));
    }

    if !metadata.prom_tools_used.is_empty() && metadata.prom_tools_failed.is_empty() {
        let _ = writeln!(
            out,
            "Prometheus: {} tool types used",
            metadata.prom_tools_used.len()
        );
        let _ = writeln!(out, "   - Tools: {}", sorted_unique(&metadata.prom_tools_used));
        let _ = writeln!(out, "   - Metrics analyzed successfully");
    } else if !metadata.prom_tools_failed.is_empty() {
        let _ = writeln!(out, "Prometheus: connection failed");
        for failed in metadata.prom_tools_failed.iter().take(2) {
            let _ = writeln!(out, "   - {}", truncated(&failed.error, 80));
        }
    } else {
        let _ = writeln!(out, "Prometheus: not available or not used");
        let _ = writeln!(out, "   - Report generated using Kubernetes data only");
    }

    let other_failed: Vec<&ToolFailure> = metadata
        .tools_failed
        .iter()
        .filter(|failure| !failure.tool.starts_with("prometheus_"))
        .collect();
    if !other_failed.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "*Other Issues:*");
        for failed in other_failed {
            let _ = writeln!(out, "   - {}: {}", failed.tool, truncated(&failed.error, 60));
        }
    }

    out.push('\n');
    let _ = write!(out, "Total tool calls: {}", metadata.total_tool_calls);
    out
}
