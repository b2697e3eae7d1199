//! Slack alerts for persisted clusters.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::config::ConfigError;
use crate::types::ClusterSummary;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("slack rejected the message (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    /// Create from `SLACK_WEBHOOK_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("SLACK_WEBHOOK_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("SLACK_WEBHOOK_URL"))?;
        Self::new(url)
    }

    pub fn new(webhook_url: impl Into<String>) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::Invalid {
                key: "SLACK_WEBHOOK_URL",
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }

    pub async fn notify(&self, cluster: &ClusterSummary) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&build_message(cluster, Utc::now()))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(cluster_id = %cluster.id, severity = %cluster.severity, "slack alert sent");
        Ok(())
    }
}

/// Block Kit payload for one cluster. Every sample line is sent; the context
/// line carries `sent_at`, not the cluster's creation time.
pub fn build_message(cluster: &ClusterSummary, sent_at: DateTime<Utc>) -> Value {
    let severity = cluster.severity.as_str().to_uppercase();
    let sample = if cluster.sample.is_empty() {
        "(no sample lines)".to_string()
    } else {
        cluster.sample.join("\n")
    };
    let when = sent_at.format("%Y-%m-%d %H:%M:%S UTC");

    json!({
        "text": format!("{severity}: {}", cluster.cluster_label),
        "blocks": [
            {
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": format!("🚨 {severity}: {}", cluster.cluster_label),
                    "emoji": true
                }
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*Root cause:*\n{}", cluster.root_cause) },
                    { "type": "mrkdwn", "text": format!("*Occurrences:*\n{}", cluster.count) }
                ]
            },
            { "type": "divider" },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*Sample:*\n```{sample}```") }
            },
            {
                "type": "context",
                "elements": [
                    { "type": "mrkdwn", "text": format!("Reported by WatchDog Lite at {when} · event {}", cluster.event_id) }
                ]
            }
        ]
    })
}
