//! Report generation through an external analysis agent.
//!
//! The agent is an arbitrary shell command that prints a single JSON
//! document on stdout: `{"status": "...", "html": "...", "metadata": {...}}`.
//! The command is spawned with `kill_on_drop`, so when the caller's deadline
//! expires and the generation future is dropped, the child is terminated
//! rather than left running.

use std::process::Stdio;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::report::{GeneratedReport, GenerationMetadata, ReportGenerator};

pub struct CommandGenerator {
    command: String,
}

#[derive(Deserialize)]
struct AgentOutput {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    html: String,
    #[serde(default)]
    metadata: GenerationMetadata,
}

impl CommandGenerator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

/// Agents sometimes prefix the document with chatter; keep everything from
/// the first HTML marker onward.
fn strip_leading_chatter(html: &str) -> &str {
    if let Some(index) = html.find("<!DOCTYPE") {
        return &html[index..];
    }
    let lower = html.to_ascii_lowercase();
    if let Some(index) = lower.find("<html") {
        return &html[index..];
    }
    html
}

#[async_trait]
impl ReportGenerator for CommandGenerator {
    async fn generate(&self) -> anyhow::Result<GeneratedReport> {
        info!(command = %self.command, "running analysis agent");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to spawn analysis agent")?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            debug!(stderr = %stderr.chars().take(500).collect::<String>(), "agent stderr");
        }
        if !output.status.success() {
            bail!(
                "analysis agent exited with {}: {}",
                output.status,
                stderr.chars().take(500).collect::<String>(),
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: AgentOutput =
            serde_json::from_str(&stdout).context("analysis agent produced invalid JSON")?;

        if let Some(status) = parsed.status.as_deref() {
            if status != "success" {
                bail!("analysis agent reported status {status:?}");
            }
        }

        let html = strip_leading_chatter(&parsed.html).trim().to_owned();
        if html.is_empty() {
            bail!("analysis agent returned an empty report");
        }

        info!(
            report_size = html.len(),
            tool_calls = parsed.metadata.total_tool_calls,
            "analysis agent finished"
        );
        Ok(GeneratedReport {
            html,
            metadata: parsed.metadata,
        })
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        // The child either exited or was killed on drop; nothing lingers.
        debug!("agent resources released");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn echo_json(json: &str) -> CommandGenerator {
        CommandGenerator::new(format!("echo '{json}'"))
    }

    #[tokio::test]
    async fn parses_the_agent_document() {
        let generator = echo_json(
            r#"{"status":"success","html":"<html>report</html>","metadata":{"total_tool_calls":4}}"#,
        );
        let report = generator.generate().await.unwrap();
        assert_eq!(report.html, "<html>report</html>");
        assert_eq!(report.metadata.total_tool_calls, 4);
    }

    #[tokio::test]
    async fn missing_status_is_accepted() {
        let generator = echo_json(r#"{"html":"<html>ok</html>"}"#);
        assert!(generator.generate().await.is_ok());
    }

    #[tokio::test]
    async fn chatter_before_the_document_is_stripped() {
        let generator = echo_json(
            r#"{"status":"success","html":"Here is the report: <!DOCTYPE html><html>x</html>"}"#,
        );
        let report = generator.generate().await.unwrap();
        assert_eq!(report.html, "<!DOCTYPE html><html>x</html>");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let generator = CommandGenerator::new("echo doomed >&2; exit 3");
        let error = generator.generate().await.unwrap_err();
        assert!(error.to_string().contains("exited with"));
        assert!(error.to_string().contains("doomed"));
    }

    #[tokio::test]
    async fn error_status_is_an_error() {
        let generator = echo_json(r#"{"status":"error","html":"<html>x</html>"}"#);
        let error = generator.generate().await.unwrap_err();
        assert!(error.to_string().contains("status \"error\""));
    }

    #[tokio::test]
    async fn invalid_json_is_an_error() {
        let generator = CommandGenerator::new("echo not-json");
        let error = generator.generate().await.unwrap_err();
        assert!(error.to_string().contains("invalid JSON"));
    }

    #[tokio::test]
    async fn empty_report_is_an_error() {
        let generator = echo_json(r#"{"status":"success","html":"  "}"#);
        let error = generator.generate().await.unwrap_err();
        assert!(error.to_string().contains("empty report"));
    }
}
