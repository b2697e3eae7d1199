//! Failures talking to the chat-completions endpoint.
//!
//! Everything here surfaces to the summarizer as `ModelError::Unavailable`;
//! the distinctions only matter to the retry loop and to usage records.

use std::time::Duration;

/// What the endpoint told us about a failed call.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub http_status: Option<u16>,
    /// `error.code` from the response body, e.g. "rate_limit_exceeded".
    pub provider_code: Option<String>,
    /// `x-request-id` header, for matching against the endpoint's own logs.
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(self, status: u16) -> Self {
        Self {
            http_status: Some(status),
            ..self
        }
    }

    pub fn with_code(self, code: impl Into<String>) -> Self {
        Self {
            provider_code: Some(code.into()),
            ..self
        }
    }

    pub fn with_request_id(self, id: impl Into<String>) -> Self {
        Self {
            request_id: Some(id.into()),
            ..self
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP 429. `retry_after` comes from the header or a fixed fallback.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Duration,
        context: Option<ErrorContext>,
    },

    /// HTTP 401/403. Retrying with the same key cannot help.
    #[error("unauthorized: {message}")]
    Unauthorized {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Rejected before or by the endpoint as malformed or oversized.
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Any other non-success answer. 5xx responses are retryable.
    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    #[error("timeout after {0:?}")]
    Timeout(Duration, Option<ErrorContext>),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing key or unusable client settings; raised before any request.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn rate_limited(retry_after: Duration, context: ErrorContext) -> Self {
        Self::RateLimited {
            retry_after,
            context: Some(context),
        }
    }

    pub fn unauthorized(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Unauthorized {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: None,
        }
    }

    pub fn provider(provider: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            retryable,
            context: None,
        }
    }

    pub fn provider_with_context(
        provider: &'static str,
        message: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the gateway should try the same request again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(..) => true,
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Unauthorized { .. } | Self::InvalidRequest { .. } | Self::Config(_) => false,
        }
    }

    /// Stable code for usage records and batch reports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Unauthorized { .. } => "unauthorized",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Provider { .. } => "provider_error",
            Self::Timeout(..) => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        let context = match self {
            Self::RateLimited { context, .. }
            | Self::Unauthorized { context, .. }
            | Self::InvalidRequest { context, .. }
            | Self::Provider { context, .. }
            | Self::Timeout(_, context) => context,
            Self::Http(_) | Self::Config(_) => return None,
        };
        context.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context()?.request_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retried() {
        assert!(ProviderError::rate_limited(Duration::from_secs(1), ErrorContext::new())
            .is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(30), None).is_retryable());
        assert!(ProviderError::provider("openai", "HTTP 503", true).is_retryable());
        assert!(!ProviderError::provider("openai", "HTTP 404", false).is_retryable());
        assert!(!ProviderError::unauthorized("bad key", ErrorContext::new()).is_retryable());
        assert!(!ProviderError::invalid_request("too large").is_retryable());
        assert!(!ProviderError::config("OPENAI_API_KEY not set").is_retryable());
    }

    #[test]
    fn request_id_comes_from_context() {
        let err = ProviderError::provider_with_context(
            "openai",
            "HTTP 502",
            true,
            ErrorContext::new().with_status(502).with_request_id("req-1"),
        );
        assert_eq!(err.request_id(), Some("req-1"));
        assert_eq!(err.code(), "provider_error");
        assert_eq!(err.context().and_then(|c| c.http_status), Some(502));

        assert_eq!(ProviderError::config("x").request_id(), None);
        assert_eq!(ProviderError::invalid_request("x").request_id(), None);
    }
}
