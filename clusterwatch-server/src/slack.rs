//! Slack delivery.
//!
//! A webhook message always works; when a bot token and channel are also
//! configured the report document itself is uploaded through the external
//! upload flow (`files.getUploadURLExternal`, raw POST,
//! `files.completeUploadExternal`) with the summary as the initial comment.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::report::ReportSink;

pub struct SlackSink {
    http: reqwest::Client,
    webhook_url: String,
    bot_token: Option<String>,
    channel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackApiResponse {
    #[serde(default)]
    ok: bool,
    error: Option<String>,
    upload_url: Option<String>,
    file_id: Option<String>,
}

impl SlackApiResponse {
    fn check(self, step: &str) -> anyhow::Result<Self> {
        if !self.ok {
            bail!(
                "Slack API error ({step}): {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(self)
    }
}

impl SlackSink {
    pub fn new(
        webhook_url: impl Into<String>,
        bot_token: Option<String>,
        channel: Option<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        let sink = Self {
            webhook_url: webhook_url.into(),
            bot_token,
            channel,
            http,
        };
        info!(has_upload = sink.can_upload(), "slack sink initialized");
        Ok(sink)
    }

    fn can_upload(&self) -> bool {
        self.bot_token.is_some() && self.channel.is_some()
    }

    async fn send_message(&self, text: &str) -> anyhow::Result<()> {
        self.http
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .context("webhook request failed")?
            .error_for_status()
            .context("webhook rejected the message")?;
        info!(text_length = text.len(), "slack message sent");
        Ok(())
    }

    async fn upload_file(&self, content: &str, filename: &str, message: &str) -> anyhow::Result<()> {
        let (Some(token), Some(channel)) = (self.bot_token.as_deref(), self.channel.as_deref())
        else {
            bail!("upload requires a bot token and channel");
        };

        let granted: SlackApiResponse = self
            .http
            .post("https://slack.com/api/files.getUploadURLExternal")
            .bearer_auth(token)
            .form(&[("filename", filename), ("length", &content.len().to_string())])
            .send()
            .await
            .context("upload URL request failed")?
            .error_for_status()?
            .json()
            .await
            .context("upload URL response was not JSON")?;
        let granted = granted.check("getUploadURLExternal")?;
        let upload_url = granted
            .upload_url
            .context("upload grant without upload_url")?;
        let file_id = granted.file_id.context("upload grant without file_id")?;

        self.http
            .post(&upload_url)
            .header(reqwest::header::CONTENT_TYPE, "text/html")
            .body(content.to_owned())
            .send()
            .await
            .context("file upload failed")?
            .error_for_status()?;

        let files = json!([{ "id": file_id, "title": "Weekly Cluster Health Report" }]);
        let completed: SlackApiResponse = self
            .http
            .post("https://slack.com/api/files.completeUploadExternal")
            .bearer_auth(token)
            .form(&[
                ("files", files.to_string().as_str()),
                ("channel_id", channel),
                ("initial_comment", message),
            ])
            .send()
            .await
            .context("upload completion failed")?
            .error_for_status()?
            .json()
            .await
            .context("upload completion response was not JSON")?;
        completed.check("completeUploadExternal")?;

        info!(filename, channel, file_id, "slack file shared");
        Ok(())
    }
}

#[async_trait]
impl ReportSink for SlackSink {
    async fn deliver(&self, html: &str, filename: &str, message: &str) -> anyhow::Result<()> {
        if self.can_upload() {
            self.upload_file(html, filename, message).await
        } else {
            self.send_message(&format!(
                "{message}\n\nNote: configure SLACK_BOT_TOKEN and SLACK_CHANNEL \
                to receive the full report document."
            ))
            .await
        }
    }
}
