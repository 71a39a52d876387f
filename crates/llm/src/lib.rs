pub mod error;
pub mod ollama;
pub mod provider;
pub mod retry;

pub use error::LlmError;
pub use ollama::{OllamaConfig, OllamaProvider};
pub use provider::{
    Completion, CompletionRequest, LlmProvider, TokenStream, ToolCall, ToolSpec,
};
pub use retry::RetryPolicy;
