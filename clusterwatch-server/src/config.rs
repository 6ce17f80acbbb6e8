//! Environment-sourced service configuration.
//!
//! Every knob has a default except the agent command and the Slack webhook,
//! which have no sensible fallback and fail startup when missing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use cron::Schedule;

#[derive(Debug, Clone)]
pub struct Config {
    /// Cluster this instance reports on; scopes the report archive.
    pub cluster_name: String,
    /// Client label, used in delivered report filenames.
    pub client_name: String,
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub poll_interval: Duration,
    pub max_retries: u16,
    pub retention_weeks: i64,
    /// Shell command that produces the report JSON on stdout.
    pub agent_command: String,
    /// Hard cap on one report generation run.
    pub generation_timeout: Duration,
    /// Cron expression (with seconds field) for the periodic report.
    pub report_schedule: Schedule,
    pub slack_webhook_url: String,
    pub slack_bot_token: Option<String>,
    pub slack_channel: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:8000")
            .parse()
            .context("invalid BIND_ADDR")?;
        let poll_interval_secs: u64 = env_or("JOB_POLL_INTERVAL_SECS", "5")
            .parse()
            .context("invalid JOB_POLL_INTERVAL_SECS")?;
        let max_retries: u16 = env_or("JOB_MAX_RETRIES", "3")
            .parse()
            .context("invalid JOB_MAX_RETRIES")?;
        let retention_weeks: i64 = env_or("RETENTION_WEEKS", "2")
            .parse()
            .context("invalid RETENTION_WEEKS")?;
        let generation_timeout_secs: u64 = env_or("GENERATION_TIMEOUT_SECS", "300")
            .parse()
            .context("invalid GENERATION_TIMEOUT_SECS")?;
        // 08:00 every Monday.
        let report_schedule = Schedule::from_str(&env_or("REPORT_SCHEDULE", "0 0 8 * * Mon"))
            .context("invalid REPORT_SCHEDULE cron expression")?;

        Ok(Self {
            cluster_name: env_or("CLUSTER_NAME", "default"),
            client_name: env_or("CLIENT_NAME", "default"),
            data_dir: PathBuf::from(env_or("DATA_DIR", "/app/data")),
            bind_addr,
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_retries,
            retention_weeks,
            agent_command: std::env::var("AGENT_COMMAND").context("AGENT_COMMAND must be set")?,
            generation_timeout: Duration::from_secs(generation_timeout_secs),
            report_schedule,
            slack_webhook_url: std::env::var("SLACK_WEBHOOK_URL")
                .context("SLACK_WEBHOOK_URL must be set")?,
            slack_bot_token: env_opt("SLACK_BOT_TOKEN"),
            slack_channel: env_opt("SLACK_CHANNEL"),
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("clusterwatch.db")
    }
}
