//! Usage tracking via the UsageSink trait.
//!
//! The gateway reports every attempt through a UsageSink, which keeps it
//! decoupled from where call telemetry ends up:
//! - the CLI uses TracingUsageSink (structured `tracing` events)
//! - tests use NoopUsageSink or a recording sink

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::EventId;

/// Status of a model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of one model call attempt.
#[derive(Debug, Clone)]
pub struct ModelCallRecord {
    /// Provider name, e.g. "openai".
    pub provider: &'static str,
    /// Model used.
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<String>,
    /// Which code path made this call.
    pub caller: &'static str,
    pub event_id: Option<EventId>,
    pub batch_index: Option<usize>,
    /// Zero-based retry attempt.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

impl ModelCallRecord {
    pub fn new(provider: &'static str, model: impl Into<String>, caller: &'static str) -> Self {
        Self {
            provider,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            event_id: None,
            batch_index: None,
            attempt: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn run(mut self, event_id: Option<EventId>, batch_index: Option<usize>) -> Self {
        self.event_id = event_id;
        self.batch_index = batch_index;
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }
}

/// Trait for recording model call usage.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a call. Fire-and-forget: failures are logged, never propagated.
    async fn record(&self, record: ModelCallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ModelCallRecord) {}
}

/// Usage sink that emits one `tracing` event per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: ModelCallRecord) {
        tracing::info!(
            target: "watchdog::usage",
            provider = record.provider,
            model = %record.model,
            caller = record.caller,
            event_id = ?record.event_id,
            batch = ?record.batch_index,
            attempt = record.attempt,
            tokens = record.input_tokens + record.output_tokens,
            latency_ms = record.latency_ms,
            status = record.status.as_str(),
            error_code = record.error_code.as_deref().unwrap_or(""),
            "model call"
        );
    }
}
