use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Lazily produced text fragments of a streamed completion.
///
/// The stream is finite and cannot be restarted. Dropping it closes the
/// underlying provider connection.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: 1024,
            temperature: 0.0,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Result of a single non-streaming generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub token_count: u32,
    pub model: String,
    pub provider: String,
}

/// A function the model may ask to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider identifier reported in response metadata.
    fn name(&self) -> &str;

    /// Generation model identifier reported in response metadata.
    fn model(&self) -> &str;

    /// Whether `complete_with_tools` is backed by native function calling.
    fn supports_tools(&self) -> bool {
        false
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;

    async fn stream_complete(&self, request: CompletionRequest) -> Result<TokenStream, LlmError>;

    async fn complete_with_tools(
        &self,
        _prompt: &str,
        _tools: &[ToolSpec],
    ) -> Result<Vec<ToolCall>, LlmError> {
        Err(LlmError::Unsupported("tool calling"))
    }
}
