//! Getting log entries into the event store: manual uploads and pulls from
//! the New Relic NerdGraph API.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ConfigError;
use crate::store::{EventStore, StoreError};
use crate::types::{EventId, LogEntry};

pub const DEFAULT_NERDGRAPH_ENDPOINT: &str = "https://api.newrelic.com/graphql";
pub const DEFAULT_FETCH_WINDOW: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_FETCH_LIMIT: u32 = 1000;

/// Timestamps above this are taken to be epoch milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("upload is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("upload must be a JSON array of log entries")]
    NotArray,
    #[error("no log entries to ingest")]
    Empty,
    #[error("entry {index}: {message}")]
    InvalidEntry { index: usize, message: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("NerdGraph returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("NerdGraph query failed: {0}")]
    Query(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// =============================================================================
// Upload
// =============================================================================

/// Validate an uploaded file: a non-empty JSON array of
/// `{timestamp: number, message: string, logLevel: string}`.
pub fn parse_upload(bytes: &[u8]) -> Result<Vec<LogEntry>, IngestError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Array(items) = value else {
        return Err(IngestError::NotArray);
    };
    if items.is_empty() {
        return Err(IngestError::Empty);
    }
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            upload_entry(item).map_err(|message| IngestError::InvalidEntry { index, message })
        })
        .collect()
}

fn upload_entry(item: &Value) -> Result<LogEntry, String> {
    let obj = item.as_object().ok_or("not an object")?;
    let timestamp = match obj.get("timestamp") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or("timestamp out of range")?,
        Some(_) => return Err("timestamp must be a number".into()),
        None => return Err("missing timestamp".into()),
    };
    let text = |key: &str| -> Result<String, String> {
        match obj.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(format!("{key} must be a string")),
            None => Err(format!("missing {key}")),
        }
    };
    Ok(LogEntry {
        timestamp,
        message: text("message")?,
        log_level: text("logLevel")?,
    })
}

/// Store a new event batch and return its id.
pub async fn ingest_events(
    store: &dyn EventStore,
    events: Vec<LogEntry>,
    owner_id: &str,
) -> Result<EventId, IngestError> {
    if events.is_empty() {
        return Err(IngestError::Empty);
    }
    let count = events.len();
    let id = store.insert_event(events, owner_id).await?;
    tracing::info!(event_id = %id, entries = count, owner = owner_id, "event stored");
    Ok(id)
}

// =============================================================================
// NerdGraph
// =============================================================================

#[derive(Debug, Clone)]
pub struct NerdGraphClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    account_id: u64,
}

#[derive(Serialize)]
struct GraphQlRequest {
    query: String,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<ActorData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct ActorData {
    actor: Actor,
}

#[derive(Deserialize)]
struct Actor {
    account: Account,
}

#[derive(Deserialize)]
struct Account {
    logs: Logs,
}

#[derive(Deserialize)]
struct Logs {
    #[serde(default)]
    events: Vec<NerdGraphEvent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NerdGraphEvent {
    timestamp: f64,
    message: Option<NerdGraphMessage>,
    log_level: Option<String>,
}

#[derive(Deserialize)]
struct NerdGraphMessage {
    content: Option<String>,
}

impl NerdGraphClient {
    /// Create from `NR_API_KEY`, `NR_ACCOUNT_ID` and optional `NR_ENDPOINT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("NR_API_KEY").map_err(|_| ConfigError::Missing("NR_API_KEY"))?;
        let account_id = std::env::var("NR_ACCOUNT_ID")
            .map_err(|_| ConfigError::Missing("NR_ACCOUNT_ID"))?;
        let account_id = account_id.trim().parse().map_err(|_| ConfigError::Invalid {
            key: "NR_ACCOUNT_ID",
            message: format!("not a numeric account id: {account_id}"),
        })?;
        let endpoint = std::env::var("NR_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_NERDGRAPH_ENDPOINT.to_string());
        Self::with_config(api_key, account_id, endpoint, Duration::from_secs(30))
    }

    pub fn with_config(
        api_key: impl Into<String>,
        account_id: u64,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::Missing("NR_API_KEY"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                key: "NR_ENDPOINT",
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            account_id,
        })
    }

    fn logs_query(&self, from: i64, to: i64, limit: u32) -> String {
        format!(
            "{{ actor {{ account(id: {account}) {{ logs {{ \
             events(filter: {{ timestamp: {{ from: {from}, to: {to} }} }}, limit: {limit}) \
             {{ timestamp message {{ content }} logLevel }} }} }} }} }}",
            account = self.account_id,
        )
    }

    /// Fetch log events from the last `window`, oldest first.
    pub async fn fetch_recent(
        &self,
        window: Duration,
        limit: u32,
    ) -> Result<Vec<LogEntry>, IngestError> {
        let to = chrono::Utc::now().timestamp();
        let from = to - window.as_secs() as i64;

        let response = self
            .client
            .post(&self.endpoint)
            .header("API-Key", &self.api_key)
            .json(&GraphQlRequest {
                query: self.logs_query(from, to, limit),
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(IngestError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GraphQlResponse = serde_json::from_str(&body)?;
        if let Some(first) = parsed.errors.first() {
            return Err(IngestError::Query(first.message.clone()));
        }
        let data = parsed
            .data
            .ok_or_else(|| IngestError::Query("response carried no data".into()))?;

        let mut entries: Vec<LogEntry> = data
            .actor
            .account
            .logs
            .events
            .into_iter()
            .map(|event| LogEntry {
                timestamp: to_epoch_seconds(event.timestamp),
                message: event.message.and_then(|m| m.content).unwrap_or_default(),
                log_level: event.log_level.unwrap_or_else(|| "UNKNOWN".to_string()),
            })
            .collect();
        entries.sort_by_key(|e| e.timestamp);

        tracing::info!(entries = entries.len(), window_secs = window.as_secs(), "fetched logs");
        Ok(entries)
    }
}

fn to_epoch_seconds(raw: f64) -> i64 {
    let ts = raw.trunc() as i64;
    if ts > MILLIS_THRESHOLD {
        ts / 1000
    } else {
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_upload() {
        let raw = br#"[
            {"timestamp": 1700000000, "message": "ok", "logLevel": "INFO"},
            {"timestamp": 1700000001.9, "message": "boom", "logLevel": "ERROR", "host": "web-1"}
        ]"#;
        let entries = parse_upload(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].timestamp, 1_700_000_001);
        assert_eq!(entries[1].log_level, "ERROR");
    }

    #[test]
    fn rejects_bad_uploads() {
        assert!(matches!(parse_upload(b"not json"), Err(IngestError::NotJson(_))));
        assert!(matches!(parse_upload(br#"{"events": []}"#), Err(IngestError::NotArray)));
        assert!(matches!(parse_upload(b"[]"), Err(IngestError::Empty)));

        let err = parse_upload(
            br#"[{"timestamp": 1, "message": "a", "logLevel": "INFO"},
                 {"timestamp": "yesterday", "message": "b", "logLevel": "INFO"}]"#,
        )
        .unwrap_err();
        match err {
            IngestError::InvalidEntry { index, message } => {
                assert_eq!(index, 1);
                assert!(message.contains("timestamp"));
            }
            other => panic!("expected InvalidEntry, got {other:?}"),
        }

        assert!(matches!(
            parse_upload(br#"[{"timestamp": 1, "logLevel": "INFO"}]"#),
            Err(IngestError::InvalidEntry { index: 0, .. })
        ));
    }

    #[test]
    fn millisecond_timestamps_are_normalized() {
        assert_eq!(to_epoch_seconds(1_700_000_000_123.0), 1_700_000_000);
        assert_eq!(to_epoch_seconds(1_700_000_000.0), 1_700_000_000);
    }

    #[test]
    fn query_embeds_account_and_window() {
        let client =
            NerdGraphClient::with_config("key", 42, DEFAULT_NERDGRAPH_ENDPOINT, Duration::from_secs(1))
                .unwrap();
        let q = client.logs_query(100, 200, 1000);
        assert!(q.contains("account(id: 42)"));
        assert!(q.contains("from: 100, to: 200"));
        assert!(q.contains("limit: 1000"));
        assert!(q.contains("message { content }"));
    }
}
