mod client;
pub mod prompt_builder;
pub(crate) mod schema;
pub(crate) mod types;

pub use prompt_builder::{OpenAiOutputBuilder, OpenAiPromptBuilder};
pub use schema::StructuredOutput;

use std::time::Duration;

use crate::traits::Agent;
use anyhow::Result;

use client::{OpenAiClient, OPENAI_API_URL};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_MAX_TOKENS: u32 = 4096;

// =============================================================================
// OpenAi Agent
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
    timeout: Duration,
    pub(crate) max_tokens: u32,
}

impl std::fmt::Debug for OpenAi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAi")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Per-request time limit enforced by the HTTP client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Same credentials and endpoint, different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn client(&self) -> Result<OpenAiClient> {
        OpenAiClient::new(
            &self.api_key,
            self.base_url.as_deref().unwrap_or(OPENAI_API_URL),
            self.timeout,
        )
    }
}

// =============================================================================
// Agent Implementation
// =============================================================================

impl Agent for OpenAi {
    type PromptBuilder = OpenAiPromptBuilder;

    fn prompt(&self, input: impl Into<String>) -> OpenAiPromptBuilder {
        OpenAiPromptBuilder::new(self.clone(), input.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_new() {
        let ai = OpenAi::new("sk-test", "gpt-4.1");
        assert_eq!(ai.model, "gpt-4.1");
        assert_eq!(ai.api_key, "sk-test");
        assert_eq!(ai.timeout, DEFAULT_TIMEOUT);
        assert_eq!(ai.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_openai_with_base_url() {
        let ai = OpenAi::new("sk-test", "gpt-4.1").with_base_url("https://proxy.example.com/v1");
        assert_eq!(ai.base_url.as_deref(), Some("https://proxy.example.com/v1"));
    }

    #[test]
    fn test_with_model_keeps_credentials() {
        let ai = OpenAi::new("sk-test", "gpt-4.1").with_timeout(Duration::from_secs(30));
        let other = ai.with_model("gpt-4.1-mini");
        assert_eq!(other.model(), "gpt-4.1-mini");
        assert_eq!(other.api_key, "sk-test");
        assert_eq!(other.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let ai = OpenAi::new("sk-secret", "gpt-4.1");
        assert!(!format!("{ai:?}").contains("sk-secret"));
    }
}
