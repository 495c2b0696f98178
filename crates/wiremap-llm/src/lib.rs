pub mod anthropic;
pub mod parse;
pub mod prompt;

pub use anthropic::AnthropicClient;
pub use parse::{parse_expansion, Expansion};
pub use prompt::PromptContextualizer;

use anyhow::Result;
use async_trait::async_trait;

/// Sampling knobs for one completion request.
#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Capability contract for the language model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, options: &LlmOptions) -> Result<String>;
}
