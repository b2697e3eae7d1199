//! Model client: one prompt in, raw completion text out.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SummarizerConfig;
use crate::gateway::{Attribution, ChatGateway, ChatRequest, FinishReason, ProviderError};
use crate::prompts::PromptInstance;

/// Per-batch model failures. Both are recoverable: the batch yields no clusters.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Transport, auth, rate limit or timeout talking to the model.
    #[error("model unavailable: {0}")]
    Unavailable(#[from] ProviderError),
    /// The model answered with no content.
    #[error("model returned an empty response")]
    EmptyResponse,
}

impl ModelError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(err) => err.code(),
            Self::EmptyResponse => "empty_response",
        }
    }
}

#[derive(Clone)]
pub struct ModelClient {
    gateway: Arc<dyn ChatGateway>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl ModelClient {
    pub fn new(gateway: Arc<dyn ChatGateway>, config: &SummarizerConfig) -> Self {
        Self {
            gateway,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.call_timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send the prompt and return the completion text.
    ///
    /// The timeout covers the whole gateway call including its retries; on
    /// expiry the in-flight request is dropped.
    pub async fn complete(
        &self,
        prompt: &PromptInstance,
        attribution: Attribution,
    ) -> Result<String, ModelError> {
        let mut req = ChatRequest::new(&self.model, prompt.to_messages(), attribution)
            .temperature(self.temperature);
        if let Some(max) = self.max_tokens {
            req = req.max_tokens(max);
        }

        let resp = tokio::time::timeout(self.timeout, self.gateway.chat(req))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout, None))??;

        if resp.finish_reason == FinishReason::Length {
            tracing::warn!(model = %self.model, "completion truncated at max tokens");
        }

        if resp.content.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(resp.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatResponse, Role};
    use crate::prompts::DEFAULT_PROMPT;
    use crate::types::LogEntry;
    use std::sync::Mutex;

    struct Canned {
        reply: Result<&'static str, ()>,
        delay: Duration,
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait::async_trait]
    impl ChatGateway for Canned {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.seen.lock().unwrap().push(req);
            tokio::time::sleep(self.delay).await;
            match self.reply {
                Ok(text) => Ok(ChatResponse::text(text)),
                Err(()) => Err(ProviderError::provider("openai", "HTTP 503", true)),
            }
        }
    }

    fn client(reply: Result<&'static str, ()>, delay: Duration) -> (ModelClient, Arc<Canned>) {
        let gateway = Arc::new(Canned {
            reply,
            delay,
            seen: Mutex::new(Vec::new()),
        });
        let config = SummarizerConfig {
            call_timeout: Duration::from_millis(50),
            ..SummarizerConfig::default()
        };
        (ModelClient::new(gateway.clone(), &config), gateway)
    }

    fn prompt() -> PromptInstance {
        DEFAULT_PROMPT
            .render(&[LogEntry::new(1, "ERROR", "boom")])
            .unwrap()
    }

    #[tokio::test]
    async fn sends_low_temperature_user_prompt() {
        let (client, gateway) = client(Ok("[]"), Duration::ZERO);
        let text = client.complete(&prompt(), Attribution::new("test")).await.unwrap();
        assert_eq!(text, "[]");

        let seen = gateway.seen.lock().unwrap();
        assert_eq!(seen[0].temperature, 0.2);
        assert_eq!(seen[0].model, "gpt-4o");
        assert_eq!(seen[0].messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn blank_content_is_empty_response() {
        let (client, _) = client(Ok("  \n"), Duration::ZERO);
        let err = client.complete(&prompt(), Attribution::new("test")).await.unwrap_err();
        assert!(matches!(err, ModelError::EmptyResponse));
    }

    #[tokio::test]
    async fn gateway_failure_is_unavailable() {
        let (client, _) = client(Err(()), Duration::ZERO);
        let err = client.complete(&prompt(), Attribution::new("test")).await.unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(_)));
        assert_eq!(err.code(), "provider_error");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_as_unavailable() {
        let (client, _) = client(Ok("[]"), Duration::from_secs(5));
        let err = client.complete(&prompt(), Attribution::new("test")).await.unwrap_err();
        assert!(matches!(
            err,
            ModelError::Unavailable(ProviderError::Timeout(_, _))
        ));
    }
}
