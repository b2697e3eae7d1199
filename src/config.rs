//! Run configuration for the summarization pipeline.
//!
//! The pipeline never reads the environment itself: callers build a
//! [`SummarizerConfig`] (usually via [`SummarizerConfig::from_env`]) and hand it
//! to [`crate::summarize::Summarizer::new`].

use std::time::Duration;

use crate::prompts::prompt_by_slug;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_PROMPT_SLUG: &str = "clusters_v1";

/// Invalid or missing configuration. Always fatal, raised before a run starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid batch size {0}: must be a positive integer")]
    InvalidBatchSize(String),
    #[error("invalid worker count {0}: must be at least 1")]
    InvalidWorkers(String),
    #[error("invalid temperature {0}: must be within 0.0..=2.0")]
    InvalidTemperature(String),
    #[error("invalid timeout {0}")]
    InvalidTimeout(String),
    #[error("unknown prompt template: {0}")]
    UnknownPrompt(String),
    #[error("missing configuration: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummarizerConfig {
    /// Log entries per model invocation.
    pub batch_size: usize,
    /// Model id sent to the chat-completions endpoint.
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Upper bound for a single model call, retries included.
    pub call_timeout: Duration,
    /// Batches processed concurrently. 1 reproduces sequential behavior.
    pub workers: usize,
    pub prompt_slug: String,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            workers: DEFAULT_WORKERS,
            prompt_slug: DEFAULT_PROMPT_SLUG.to_string(),
        }
    }
}

impl SummarizerConfig {
    /// Build from `WATCHDOG_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` is this over `std::env`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("WATCHDOG_BATCH_SIZE") {
            config.batch_size = parse_batch_size(&raw)?;
        }
        if let Some(model) = lookup("WATCHDOG_MODEL") {
            let model = model.trim();
            if model.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "WATCHDOG_MODEL",
                    message: "empty model id".into(),
                });
            }
            config.model = model.to_string();
        }
        if let Some(raw) = lookup("WATCHDOG_TEMPERATURE") {
            config.temperature = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidTemperature(raw.clone()))?;
        }
        if let Some(raw) = lookup("WATCHDOG_MAX_TOKENS") {
            let max = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "WATCHDOG_MAX_TOKENS",
                message: format!("not a positive integer: {raw}"),
            })?;
            config.max_tokens = Some(max);
        }
        if let Some(raw) = lookup("WATCHDOG_CALL_TIMEOUT_SECONDS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(raw.clone()))?;
            config.call_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("WATCHDOG_WORKERS") {
            config.workers = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidWorkers(raw.clone()))?;
        }
        if let Some(slug) = lookup("WATCHDOG_PROMPT") {
            config.prompt_slug = slug.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize("0".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkers("0".into()));
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature.to_string()));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("0s".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Missing("model"));
        }
        if prompt_by_slug(&self.prompt_slug).is_none() {
            return Err(ConfigError::UnknownPrompt(self.prompt_slug.clone()));
        }
        Ok(())
    }
}

/// Parse a batch size, rejecting zero, negative and non-integer input.
pub fn parse_batch_size(raw: &str) -> Result<usize, ConfigError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidBatchSize(raw.to_string()))?;
    if value <= 0 {
        return Err(ConfigError::InvalidBatchSize(raw.to_string()));
    }
    usize::try_from(value).map_err(|_| ConfigError::InvalidBatchSize(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sequential_gpt4o() {
        let config = SummarizerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.workers, 1);
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.prompt_slug, "clusters_v1");
    }

    #[test]
    fn overrides_are_applied() {
        let config = SummarizerConfig::from_lookup(lookup(&[
            ("WATCHDOG_BATCH_SIZE", "25"),
            ("WATCHDOG_WORKERS", "4"),
            ("WATCHDOG_MODEL", "gpt-4o-mini"),
            ("WATCHDOG_CALL_TIMEOUT_SECONDS", "10"),
            ("WATCHDOG_PROMPT", "clusters_v2"),
        ]))
        .unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.workers, 4);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.prompt_slug, "clusters_v2");
    }

    #[test]
    fn negative_or_zero_batch_size_is_a_config_error() {
        for raw in ["-5", "0", "ten", "2.5"] {
            let err = SummarizerConfig::from_lookup(lookup(&[("WATCHDOG_BATCH_SIZE", raw)]))
                .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidBatchSize(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn rejects_bad_workers_temperature_and_prompt() {
        assert!(matches!(
            SummarizerConfig::from_lookup(lookup(&[("WATCHDOG_WORKERS", "0")])),
            Err(ConfigError::InvalidWorkers(_))
        ));
        assert!(matches!(
            SummarizerConfig::from_lookup(lookup(&[("WATCHDOG_TEMPERATURE", "3.5")])),
            Err(ConfigError::InvalidTemperature(_))
        ));
        assert!(matches!(
            SummarizerConfig::from_lookup(lookup(&[("WATCHDOG_PROMPT", "nope")])),
            Err(ConfigError::UnknownPrompt(_))
        ));
    }
}
