#![forbid(unsafe_code)]

//! # watchdog-lite
//!
//! Turns raw application logs into a short list of actionable issue clusters.
//!
//! An ingested event (a batch of log entries) is split into fixed-size chunks,
//! each chunk is sent to a chat model with a clustering prompt, and the model's
//! JSON answer is validated element by element. Valid clusters from every
//! chunk are stamped with the event and owner and written in one bulk insert.
//! Model and parse failures only cost the affected chunk.
//!
//! Around that pipeline sit ingestion (uploads and New Relic pulls), Slack
//! alerts for stored clusters, and a per-minute error timeline.

pub mod aggregate;
pub mod batcher;
pub mod config;
pub mod gateway;
pub mod ingest;
pub mod model;
pub mod notify;
pub mod parse;
pub mod prompts;
pub mod store;
pub mod summarize;
pub mod timeline;
pub mod types;

pub use config::{ConfigError, SummarizerConfig};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use store::{ClusterStore, EventStore, PersistenceError, SqliteStore, StoreError};
pub use summarize::{PersistOutcome, RunOutcome, SummarizeError, Summarizer};
pub use types::{
    ClusterDraft, ClusterId, ClusterSummary, EventId, EventRecord, LogEntry, NewClusterSummary,
    Severity, SYSTEM_OWNER,
};
