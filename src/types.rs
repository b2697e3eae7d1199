//! Core records shared by the ingestion, summarization and browsing paths.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owner stamped on every record until a real identity model exists.
pub const SYSTEM_OWNER: &str = "system-user";

// =============================================================================
// IDS
// =============================================================================

macro_rules! opaque_id {
    ($name:ident, $what:literal) => {
        #[doc = concat!("Opaque identifier of ", $what, ".")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

opaque_id!(EventId, "a stored event batch");
opaque_id!(ClusterId, "a persisted cluster summary");

// =============================================================================
// LOG INPUT
// =============================================================================

/// One application log line as delivered by the aggregation API or an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub message: String,
    pub log_level: String,
}

impl LogEntry {
    pub fn new(timestamp: i64, log_level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
            log_level: log_level.into(),
        }
    }
}

/// An ingested batch of log entries. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: EventId,
    /// Seconds since the Unix epoch.
    pub created_at: i64,
    pub owner_id: String,
    pub events: Vec<LogEntry>,
}

// =============================================================================
// CLUSTERS
// =============================================================================

/// Severity the model assigns to a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Critical, Severity::Warning, Severity::Info];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }

    /// Exact, case-sensitive match against the wire values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Self::Critical),
            "warning" => Some(Self::Warning),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cluster that passed validation but is not yet tied to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDraft {
    pub cluster_label: String,
    pub root_cause: String,
    pub sample: Vec<String>,
    pub severity: Severity,
    pub count: u64,
}

/// A validated cluster stamped with its run metadata, ready to insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClusterSummary {
    pub event_id: EventId,
    pub owner_id: String,
    #[serde(flatten)]
    pub cluster: ClusterDraft,
}

/// A persisted cluster summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub id: ClusterId,
    pub event_id: EventId,
    pub owner_id: String,
    /// Seconds since the Unix epoch.
    pub created_at: i64,
    pub cluster_label: String,
    pub root_cause: String,
    pub sample: Vec<String>,
    pub severity: Severity,
    pub count: u64,
}
