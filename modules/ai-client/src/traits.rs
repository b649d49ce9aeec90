use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// Agent Trait
// =============================================================================

pub trait Agent: Clone + Send + Sync {
    type PromptBuilder: PromptBuilder;

    fn prompt(&self, input: impl Into<String>) -> Self::PromptBuilder;
}

// =============================================================================
// PromptBuilder Trait
// =============================================================================

#[async_trait]
pub trait PromptBuilder: Send + Sized {
    fn preamble(self, preamble: impl Into<String>) -> Self;
    fn temperature(self, temperature: f32) -> Self;
    /// Number of completions to sample for this prompt (`n` on the wire).
    fn samples(self, n: u32) -> Self;
    /// Attach an image (URL or `data:` URL) to the user turn.
    fn image(self, url: impl Into<String>) -> Self;

    /// Send and return the first completion.
    async fn send(self) -> Result<String>;

    /// Send and return every sampled completion, in choice order.
    async fn send_all(self) -> Result<Vec<String>>;
}

// =============================================================================
// OutputBuilder Trait
// =============================================================================

#[async_trait]
pub trait OutputBuilder<T>: Send {
    async fn send(self) -> Result<T>;
}
