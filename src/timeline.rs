//! Per-minute error counts for charting an event's logs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::LogEntry;

const BUCKET_SECS: i64 = 60;
const ERROR_LEVELS: [&str; 2] = ["ERROR", "CRITICAL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    /// Start of the minute, seconds since the Unix epoch.
    pub timestamp: i64,
    pub error_count: u64,
}

pub fn is_error_level(level: &str) -> bool {
    let level = level.trim();
    ERROR_LEVELS.iter().any(|l| l.eq_ignore_ascii_case(level))
}

/// Count ERROR/CRITICAL entries per minute, oldest first. Minutes without
/// errors are omitted.
pub fn error_timeline(events: &[LogEntry]) -> Vec<ChartPoint> {
    let mut buckets: BTreeMap<i64, u64> = BTreeMap::new();
    for entry in events.iter().filter(|e| is_error_level(&e.log_level)) {
        *buckets
            .entry(entry.timestamp.div_euclid(BUCKET_SECS) * BUCKET_SECS)
            .or_default() += 1;
    }
    buckets
        .into_iter()
        .map(|(timestamp, error_count)| ChartPoint {
            timestamp,
            error_count,
        })
        .collect()
}

pub fn total_errors(points: &[ChartPoint]) -> u64 {
    points.iter().map(|p| p.error_count).sum()
}
