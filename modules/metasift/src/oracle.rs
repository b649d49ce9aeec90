//! The generative oracle seam.
//!
//! Every pipeline stage talks to the model through [`Oracle`], which returns
//! raw completion texts. Call sites validate the shape themselves (see
//! [`crate::shape`]), so a fake oracle in tests exercises exactly the same
//! parsing paths as the real one.

use std::time::Duration;

use ai_client::{Agent, AiError, OpenAi, OutputBuilder, PromptBuilder};
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use metasift_common::OracleConfig;

/// Base backoff between oracle retries. Actual delay is base * 3^attempt + jitter.
const RETRY_BASE: Duration = Duration::from_secs(2);

/// One request to the oracle.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    /// Pipeline stage label, used for logging and by test doubles for routing.
    pub stage: &'static str,
    pub system: String,
    pub query: String,
    /// Image URLs or `data:` URLs attached to the user turn.
    pub images: Vec<String>,
    pub temperature: Option<f32>,
    /// Number of sampled completions (`n`).
    pub samples: u32,
    /// Strict JSON schema the response must follow, with its name.
    pub schema: Option<(String, Value)>,
}

impl OracleRequest {
    pub fn new(stage: &'static str, system: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            stage,
            system: system.into(),
            query: query.into(),
            images: Vec::new(),
            temperature: None,
            samples: 1,
            schema: None,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn samples(mut self, n: u32) -> Self {
        self.samples = n.max(1);
        self
    }

    pub fn image(mut self, url: impl Into<String>) -> Self {
        self.images.push(url.into());
        self
    }

    pub fn schema(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.schema = Some((name.into(), schema));
        self
    }
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Returns every completion the oracle produced, in choice order.
    /// Never returns an empty list on success.
    async fn complete(&self, request: &OracleRequest) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// OpenAiOracle
// ---------------------------------------------------------------------------

/// [`Oracle`] backed by the OpenAI chat-completions API.
///
/// Each attempt is bounded by `time_limit`; retryable failures (timeouts,
/// network errors, 429 and 5xx) are retried up to `max_try` attempts with
/// exponential backoff.
pub struct OpenAiOracle {
    ai: OpenAi,
    time_limit: Duration,
    max_try: u32,
    retry_base: Duration,
}

impl OpenAiOracle {
    pub fn new(ai: OpenAi, config: &OracleConfig) -> Self {
        let time_limit = Duration::from_secs(config.time_limit_secs);
        Self {
            ai: ai.with_timeout(time_limit).with_max_tokens(config.max_tokens),
            time_limit,
            max_try: config.max_try.max(1),
            retry_base: RETRY_BASE,
        }
    }

    /// Override the backoff base between attempts.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn model(&self) -> &str {
        self.ai.model()
    }

    async fn attempt(&self, request: &OracleRequest) -> Result<Vec<String>> {
        let mut prompt = self.ai.prompt(request.query.as_str()).preamble(request.system.as_str());
        if let Some(temperature) = request.temperature {
            prompt = prompt.temperature(temperature);
        }
        for image in &request.images {
            prompt = prompt.image(image.as_str());
        }

        match &request.schema {
            Some((name, schema)) => {
                let value: Value = prompt
                    .output::<Value>()
                    .with_schema(name.as_str(), schema.clone())
                    .send()
                    .await?;
                Ok(vec![value.to_string()])
            }
            None => prompt.samples(request.samples).send_all().await,
        }
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<Vec<String>> {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(self.time_limit, self.attempt(request)).await {
                Ok(result) => result,
                Err(_) => Err(AiError::Timeout(self.time_limit.as_secs()).into()),
            };

            let err = match outcome {
                Ok(texts) => {
                    debug!(stage = request.stage, completions = texts.len(), "Oracle call complete");
                    return Ok(texts);
                }
                Err(e) => e,
            };

            let retryable = err
                .downcast_ref::<AiError>()
                .map(AiError::is_retryable)
                .unwrap_or(false);
            attempt += 1;
            if !retryable || attempt >= self.max_try {
                return Err(err);
            }

            let backoff = self.retry_base * 3u32.pow(attempt - 1);
            let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
            warn!(
                stage = request.stage,
                attempt,
                backoff_secs = backoff.as_secs(),
                error = %err,
                "Oracle call failed, retrying after backoff"
            );
            tokio::time::sleep(backoff + jitter).await;
        }
    }
}
