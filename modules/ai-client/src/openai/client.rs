use std::time::Duration;

use anyhow::Result;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use super::types::*;
use crate::error::AiError;

pub(crate) const OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub(crate) struct OpenAiClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.to_string(),
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| AiError::Config(format!("invalid API key header: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn network_error(&self, e: reqwest::Error) -> AiError {
        if e.is_timeout() {
            AiError::Timeout(self.timeout.as_secs())
        } else {
            AiError::Network(e.to_string())
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %request.model,
            n = request.n.unwrap_or(1),
            structured = request.response_format.is_some(),
            "OpenAI chat request"
        );

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api { status, body }.into());
        }

        let body = response.text().await.map_err(|e| self.network_error(e))?;
        let chat: ChatResponse = serde_json::from_str(&body).map_err(AiError::from)?;

        if let Some(ref usage) = chat.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "OpenAI usage"
            );
        }

        Ok(chat)
    }

    /// Run a chat request and return the text of every choice, ordered by choice index.
    pub async fn completions(&self, request: &ChatRequest) -> Result<Vec<String>> {
        let mut choices = self.chat(request).await?.choices;
        choices.sort_by_key(|c| c.index);

        let mut texts = Vec::with_capacity(choices.len());
        for choice in choices {
            if let Some(refusal) = choice.message.refusal {
                debug!(refusal = %refusal, "Choice refused by model");
                continue;
            }
            if choice.finish_reason.as_deref() == Some("content_filter") {
                debug!(index = choice.index, "Choice dropped by content filter");
                continue;
            }
            match choice.message.content {
                Some(content) if !content.trim().is_empty() => texts.push(content),
                _ => {}
            }
        }

        if texts.is_empty() {
            return Err(AiError::Empty(format!("no usable choices from {}", request.model)).into());
        }
        Ok(texts)
    }
}
