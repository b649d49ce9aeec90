use std::marker::PhantomData;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::error::AiError;
use crate::traits::{OutputBuilder, PromptBuilder};
use crate::util::strip_code_blocks;

use super::schema::StructuredOutput;
use super::types::*;
use super::OpenAi;

pub struct OpenAiPromptBuilder {
    agent: OpenAi,
    input: String,
    preamble: Option<String>,
    temperature: Option<f32>,
    samples: u32,
    images: Vec<String>,
}

impl OpenAiPromptBuilder {
    pub(crate) fn new(agent: OpenAi, input: String) -> Self {
        Self {
            agent,
            input,
            preamble: None,
            temperature: None,
            samples: 1,
            images: Vec::new(),
        }
    }

    /// Create a structured output builder for extracting typed data.
    pub fn output<T: StructuredOutput + Send + 'static>(self) -> OpenAiOutputBuilder<T> {
        OpenAiOutputBuilder {
            builder: self,
            format: None,
            _phantom: PhantomData,
        }
    }

    /// Build the wire request. Temperature is dropped for models that reject it.
    fn request(&self) -> ChatRequest {
        let model = &self.agent.model;

        let mut messages = Vec::new();
        if let Some(ref preamble) = self.preamble {
            messages.push(WireMessage::system(preamble));
        }
        if !self.input.is_empty() || !self.images.is_empty() {
            messages.push(WireMessage::user_with_images(&self.input, &self.images));
        }

        let mut request = ChatRequest::new(model)
            .messages(messages)
            .token_limit(self.agent.max_tokens)
            .samples(self.samples);

        if accepts_temperature(model) {
            if let Some(temp) = self.temperature {
                request = request.temperature(temp);
            }
        }
        request
    }
}

#[async_trait]
impl PromptBuilder for OpenAiPromptBuilder {
    fn preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn samples(mut self, n: u32) -> Self {
        self.samples = n.max(1);
        self
    }

    fn image(mut self, url: impl Into<String>) -> Self {
        self.images.push(url.into());
        self
    }

    async fn send(self) -> Result<String> {
        let mut all = self.samples(1).send_all().await?;
        Ok(all.swap_remove(0))
    }

    async fn send_all(self) -> Result<Vec<String>> {
        let request = self.request();
        self.agent.client()?.completions(&request).await
    }
}

// =============================================================================
// Structured Output Builder
// =============================================================================

pub struct OpenAiOutputBuilder<T> {
    builder: OpenAiPromptBuilder,
    format: Option<(String, serde_json::Value)>,
    _phantom: PhantomData<T>,
}

impl<T> OpenAiOutputBuilder<T> {
    /// Override the schema sent on the wire; the response is still parsed as `T`.
    pub fn with_schema(mut self, name: impl Into<String>, schema: serde_json::Value) -> Self {
        self.format = Some((name.into(), schema));
        self
    }
}

#[async_trait]
impl<T: StructuredOutput + Send + 'static> OutputBuilder<T> for OpenAiOutputBuilder<T> {
    async fn send(self) -> Result<T> {
        let (name, schema) = self
            .format
            .unwrap_or_else(|| (T::type_name(), T::strict_schema()));

        debug!(type_name = %name, "OpenAI structured output extraction");

        let mut builder = self.builder.samples(1);
        if builder.temperature.is_none() {
            builder.temperature = Some(0.0);
        }
        let request = builder
            .request()
            .response_format(ResponseFormat::strict_json(sanitize_name(&name), schema));

        let mut texts = builder.agent.client()?.completions(&request).await?;
        let json_str = texts.swap_remove(0);

        serde_json::from_str(strip_code_blocks(&json_str))
            .map_err(|e| AiError::Parse(format!("failed to deserialize {name}: {e}")).into())
    }
}

/// Schema names must match `^[a-zA-Z0-9_-]+$` on the wire.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "structured_response".to_string()
    } else {
        cleaned
    }
}
