use std::time::Duration;

use llm::LlmError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("top_k must be positive")]
    InvalidTopK,

    #[error("Failed to embed query: {0}")]
    Embedding(#[source] LlmError),

    #[error("Vector search failed: {0}")]
    Search(#[source] anyhow::Error),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation failed: {0}")]
    Provider(#[from] LlmError),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Only surfaced under `FallbackPolicy::Strict`.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}
