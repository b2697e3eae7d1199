//! Parsing and validation of the model's cluster output.
//!
//! The model is untrusted. A response must be a JSON array (optionally inside
//! a single markdown code fence); anything else is malformed and the batch
//! contributes nothing. Inside the array each element is validated on its own,
//! so one bad cluster never takes its siblings down with it.

use serde_json::{Map, Value};

use crate::types::{ClusterDraft, Severity};

/// Characters of raw output kept for diagnostics.
const PREVIEW_CHARS: usize = 200;

/// The whole response is unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedResponse {
    #[error("response is not valid JSON: {message} (raw: {preview})")]
    NotJson { message: String, preview: String },
    #[error("response is a JSON {found}, expected an array")]
    NotArray { found: &'static str },
}

/// Why a single element was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotAnObject,
    Missing(&'static str),
    Empty(&'static str),
    WrongType(&'static str),
    InvalidSeverity(String),
    NegativeCount,
    /// Larger than the store can hold (`i64::MAX`).
    CountOutOfRange,
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_an_object",
            Self::Missing(_) => "missing_field",
            Self::Empty(_) => "empty_field",
            Self::WrongType(_) => "wrong_type",
            Self::InvalidSeverity(_) => "invalid_severity",
            Self::NegativeCount => "negative_count",
            Self::CountOutOfRange => "count_out_of_range",
        }
    }
}

/// Result of parsing one batch's response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBatch {
    pub clusters: Vec<ClusterDraft>,
    /// Index within the response array and reason, for every dropped element.
    pub rejected: Vec<(usize, Rejection)>,
}

pub fn parse_clusters(raw: &str) -> Result<ParsedBatch, MalformedResponse> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body).map_err(|e| MalformedResponse::NotJson {
        message: e.to_string(),
        preview: raw.chars().take(PREVIEW_CHARS).collect(),
    })?;

    let elements = match value {
        Value::Array(elements) => elements,
        other => {
            return Err(MalformedResponse::NotArray {
                found: json_kind(&other),
            })
        }
    };

    let mut parsed = ParsedBatch::default();
    for (idx, element) in elements.iter().enumerate() {
        match validate_cluster(element) {
            Ok(cluster) => parsed.clusters.push(cluster),
            Err(rejection) => {
                tracing::debug!(index = idx, reason = ?rejection, "dropping invalid cluster");
                parsed.rejected.push((idx, rejection));
            }
        }
    }
    Ok(parsed)
}

/// Validate one element of the response array.
pub fn validate_cluster(value: &Value) -> Result<ClusterDraft, Rejection> {
    let obj = value.as_object().ok_or(Rejection::NotAnObject)?;

    let cluster_label = non_empty_string(obj, "clusterLabel")?;
    let root_cause = non_empty_string(obj, "rootCause")?;
    let sample = string_array(obj, "sample")?;

    let severity = match field(obj, "severity")? {
        Value::String(s) => {
            Severity::parse(s).ok_or_else(|| Rejection::InvalidSeverity(s.clone()))?
        }
        _ => return Err(Rejection::WrongType("severity")),
    };

    let count = match field(obj, "count")? {
        Value::Number(n) => normalize_count(n)?,
        _ => return Err(Rejection::WrongType("count")),
    };

    Ok(ClusterDraft {
        cluster_label,
        root_cause,
        sample,
        severity,
        count,
    })
}

fn field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, Rejection> {
    match obj.get(name) {
        None | Some(Value::Null) => Err(Rejection::Missing(name)),
        Some(v) => Ok(v),
    }
}

fn non_empty_string(obj: &Map<String, Value>, name: &'static str) -> Result<String, Rejection> {
    match field(obj, name)? {
        Value::String(s) if s.trim().is_empty() => Err(Rejection::Empty(name)),
        Value::String(s) => Ok(s.trim().to_string()),
        _ => Err(Rejection::WrongType(name)),
    }
}

fn string_array(obj: &Map<String, Value>, name: &'static str) -> Result<Vec<String>, Rejection> {
    let items = field(obj, name)?
        .as_array()
        .ok_or(Rejection::WrongType(name))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or(Rejection::WrongType(name))
        })
        .collect()
}

/// Counts are approximate: fractions round to the nearest integer. Negative
/// counts and counts above `i64::MAX` are rejected.
fn normalize_count(n: &serde_json::Number) -> Result<u64, Rejection> {
    if let Some(v) = n.as_u64() {
        return match i64::try_from(v) {
            Ok(_) => Ok(v),
            Err(_) => Err(Rejection::CountOutOfRange),
        };
    }
    let v = n.as_f64().ok_or(Rejection::WrongType("count"))?;
    if v < 0.0 {
        return Err(Rejection::NegativeCount);
    }
    // i64::MAX as f64 rounds up to 2^63, the first value that does not fit.
    if v >= i64::MAX as f64 {
        return Err(Rejection::CountOutOfRange);
    }
    Ok(v.round() as u64)
}

/// Strip one surrounding ```/```json fence. Anything else is returned trimmed.
///
/// The info string is only dropped when a newline follows it, so a one-line
/// fence such as "```json [] ```" stays malformed.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening line.
    match inner.find('\n') {
        Some(newline) => inner[newline + 1..].trim(),
        None => inner.trim(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "clusterLabel": "Database timeouts",
            "rootCause": "Connection pool exhausted",
            "sample": ["timeout acquiring connection", "pool size 10 reached"],
            "severity": "critical",
            "count": 42
        })
    }

    fn with(key: &str, value: Value) -> Value {
        let mut v = valid();
        v[key] = value;
        v
    }

    fn without(key: &str) -> Value {
        let mut v = valid();
        v.as_object_mut().unwrap().remove(key);
        v
    }

    #[test]
    fn accepts_well_formed_cluster() {
        let c = validate_cluster(&valid()).unwrap();
        assert_eq!(c.cluster_label, "Database timeouts");
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.count, 42);
        assert_eq!(c.sample.len(), 2);
    }

    #[test]
    fn every_required_field_is_enforced() {
        for field in crate::prompts::REQUIRED_FIELDS {
            assert_eq!(
                validate_cluster(&without(field)),
                Err(Rejection::Missing(field)),
                "{field}"
            );
        }
    }

    #[test]
    fn rejects_empty_and_mistyped_fields() {
        assert_eq!(
            validate_cluster(&with("clusterLabel", json!(""))),
            Err(Rejection::Empty("clusterLabel"))
        );
        assert_eq!(
            validate_cluster(&with("rootCause", json!("   "))),
            Err(Rejection::Empty("rootCause"))
        );
        assert_eq!(
            validate_cluster(&with("sample", json!("just one line"))),
            Err(Rejection::WrongType("sample"))
        );
        assert_eq!(
            validate_cluster(&with("sample", json!(["ok", 3]))),
            Err(Rejection::WrongType("sample"))
        );
        assert_eq!(
            validate_cluster(&with("count", json!("12"))),
            Err(Rejection::WrongType("count"))
        );
        assert_eq!(
            validate_cluster(&with("clusterLabel", json!(7))),
            Err(Rejection::WrongType("clusterLabel"))
        );
        assert_eq!(validate_cluster(&json!("cluster")), Err(Rejection::NotAnObject));
    }

    #[test]
    fn severity_outside_enum_is_rejected() {
        assert_eq!(
            validate_cluster(&with("severity", json!("fatal"))),
            Err(Rejection::InvalidSeverity("fatal".into()))
        );
        assert_eq!(
            validate_cluster(&with("severity", json!("CRITICAL"))),
            Err(Rejection::InvalidSeverity("CRITICAL".into()))
        );
    }

    #[test]
    fn counts_are_normalized() {
        assert_eq!(validate_cluster(&with("count", json!(0))).unwrap().count, 0);
        assert_eq!(validate_cluster(&with("count", json!(2.6))).unwrap().count, 3);
        assert_eq!(
            validate_cluster(&with("count", json!(-1))),
            Err(Rejection::NegativeCount)
        );
    }

    #[test]
    fn counts_beyond_i64_are_rejected() {
        assert_eq!(
            validate_cluster(&with("count", json!(1e20))),
            Err(Rejection::CountOutOfRange)
        );
        assert_eq!(
            validate_cluster(&with("count", json!(u64::MAX))),
            Err(Rejection::CountOutOfRange)
        );
        assert_eq!(
            validate_cluster(&with("count", json!(i64::MAX as u64 + 1))),
            Err(Rejection::CountOutOfRange)
        );
        assert_eq!(
            validate_cluster(&with("count", json!(i64::MAX))).unwrap().count,
            i64::MAX as u64
        );
    }

    #[test]
    fn count_18446744073709551615_from_raw_text_is_rejected() {
        let raw = valid()
            .to_string()
            .replace("\"count\":42", "\"count\":18446744073709551615");
        let parsed = parse_clusters(&format!("[{raw}]")).unwrap();
        assert!(parsed.clusters.is_empty());
        assert_eq!(parsed.rejected, vec![(0, Rejection::CountOutOfRange)]);
    }

    #[test]
    fn one_line_fence_with_info_string_is_malformed() {
        assert!(matches!(
            parse_clusters("```json [] ```"),
            Err(MalformedResponse::NotJson { .. })
        ));
        assert!(parse_clusters("``` [] ```").unwrap().clusters.is_empty());
    }

    #[test]
    fn empty_sample_array_is_allowed() {
        let c = validate_cluster(&with("sample", json!([]))).unwrap();
        assert!(c.sample.is_empty());
    }

    #[test]
    fn invalid_element_does_not_affect_siblings() {
        let raw = json!([valid(), with("severity", json!("fatal")), with("count", json!(1))])
            .to_string();
        let parsed = parse_clusters(&raw).unwrap();
        assert_eq!(parsed.clusters.len(), 2);
        assert_eq!(parsed.clusters[1].count, 1);
        assert_eq!(
            parsed.rejected,
            vec![(1, Rejection::InvalidSeverity("fatal".into()))]
        );
    }

    #[test]
    fn non_json_and_non_array_are_malformed() {
        assert!(matches!(
            parse_clusters("Here are the clusters I found: none."),
            Err(MalformedResponse::NotJson { .. })
        ));
        assert_eq!(
            parse_clusters(r#"{"clusters": []}"#),
            Err(MalformedResponse::NotArray { found: "object" })
        );
        assert!(matches!(
            parse_clusters("Sure! [1, 2]"),
            Err(MalformedResponse::NotJson { .. })
        ));
    }

    #[test]
    fn code_fenced_array_is_accepted() {
        let raw = format!("```json\n{}\n```", json!([valid()]));
        assert_eq!(parse_clusters(&raw).unwrap().clusters.len(), 1);

        let bare = format!("```\n{}\n```", json!([]));
        assert!(parse_clusters(&bare).unwrap().clusters.is_empty());
    }

    #[test]
    fn empty_array_yields_no_clusters() {
        let parsed = parse_clusters(" [] ").unwrap();
        assert!(parsed.clusters.is_empty());
        assert!(parsed.rejected.is_empty());
    }
}
