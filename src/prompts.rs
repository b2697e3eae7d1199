//! Prompt templates for log clustering.
//!
//! The field list and the severity enum in these templates are a contract with
//! the response parser: change them together or not at all.

use crate::gateway::Message;
use crate::types::{LogEntry, Severity};

/// Fields every cluster object in the model's answer must carry.
pub const REQUIRED_FIELDS: [&str; 5] = ["clusterLabel", "rootCause", "sample", "severity", "count"];

const LOGS_PLACEHOLDER: &str = "{logs}";
const SEVERITIES_PLACEHOLDER: &str = "{severities}";

/// Rendered prompt ready for the model.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: String,
    pub system: Option<String>,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(&self.user));
        messages
    }

    /// Total characters sent to the model.
    pub fn len(&self) -> usize {
        self.system.as_ref().map_or(0, String::len) + self.user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("failed to encode log batch: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A prompt template with `{logs}` and `{severities}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: Option<&'static str>,
    pub user: &'static str,
}

impl PromptTemplate {
    /// Render one batch. Entries are embedded as pretty-printed JSON, in order,
    /// with every field verbatim.
    pub fn render(&self, batch: &[LogEntry]) -> Result<PromptInstance, PromptError> {
        let logs = serde_json::to_string_pretty(batch)?;
        let severities = severity_choices();

        let system = self
            .system
            .map(|s| s.replace(SEVERITIES_PLACEHOLDER, &severities).trim().to_string());

        // Logs go in last so text inside a log line can never be mistaken for
        // a placeholder.
        let user = self
            .user
            .replace(SEVERITIES_PLACEHOLDER, &severities)
            .trim()
            .replace(LOGS_PLACEHOLDER, &logs);

        Ok(PromptInstance {
            template_slug: self.slug.to_string(),
            system,
            user,
        })
    }
}

fn severity_choices() -> String {
    Severity::ALL
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

// =============================================================================
// Standard prompts
// =============================================================================

pub const PROMPT_V1: PromptTemplate = PromptTemplate {
    slug: "clusters_v1",
    system: None,
    user: r#"I need you to analyze these log entries and identify clusters of related issues.
For each cluster, provide:
1. clusterLabel: a short descriptive label
2. rootCause: the likely root cause
3. sample: a few representative log messages, copied from the logs
4. severity: exactly one of critical, warning, or info
5. count: the approximate number of occurrences of this issue in the provided logs

Respond with a JSON array only, no prose and no code fences. Each element must be an object of the form:
{
  "clusterLabel": "Short descriptive label",
  "rootCause": "Likely root cause explanation",
  "sample": ["sample log 1", "sample log 2"],
  "severity": "{severities}",
  "count": 123
}
If there are no issues, respond with [].

Here are the logs:
{logs}"#,
};

pub const PROMPT_V2: PromptTemplate = PromptTemplate {
    slug: "clusters_v2",
    system: Some(
        r#"You are a site reliability engineer triaging application logs. You group log lines into clusters that share one root cause.
Output only a JSON array. Each element is an object with exactly these fields:
- clusterLabel: string, short descriptive label, never empty
- rootCause: string, likely root cause, never empty
- sample: array of strings, representative log messages copied verbatim
- severity: one of {severities}
- count: number, approximate occurrences in the given logs
Return [] when nothing stands out. Never wrap the array in prose or code fences."#,
    ),
    user: r#"Cluster these log entries:
{logs}

json:"#,
};

pub const PROMPTS: &[PromptTemplate] = &[PROMPT_V1, PROMPT_V2];
pub const DEFAULT_PROMPT: PromptTemplate = PROMPT_V1;

pub fn prompt_by_slug(slug: &str) -> Option<PromptTemplate> {
    PROMPTS.iter().find(|t| t.slug == slug).copied()
}

// =============================================================================
// TESTS
// =============================================================================
