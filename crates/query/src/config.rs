use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions \
about the documentation. Answer using only the provided context. If the context does not \
contain the answer, say so. Cite sources as [Source N] where relevant.";

/// Everything a pipeline instance needs, passed explicitly into each
/// component so differently-tuned pipelines can coexist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub verification: VerificationConfig,
    pub timeouts: TimeoutConfig,
    pub fallback: FallbackPolicy,
}

/// What to do when retrieval fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Answer without context.
    #[default]
    OpenBook,
    /// Fail the request.
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Floor passed to the vector search.
    pub min_score: f32,
    /// Floor applied by the ranker after expansion.
    pub min_relevance: f32,
    pub expand: bool,
    pub max_additional: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub concurrency: usize,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub embed_ms: u64,
    pub search_ms: u64,
    pub expand_ms: u64,
    pub completion_ms: u64,
    /// Longest silence tolerated between two streamed fragments.
    pub stream_idle_ms: u64,
    pub tool_ms: u64,
}

impl TimeoutConfig {
    pub fn embed(&self) -> Duration {
        Duration::from_millis(self.embed_ms)
    }

    pub fn search(&self) -> Duration {
        Duration::from_millis(self.search_ms)
    }

    pub fn expand(&self) -> Duration {
        Duration::from_millis(self.expand_ms)
    }

    pub fn completion(&self) -> Duration {
        Duration::from_millis(self.completion_ms)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_millis(self.stream_idle_ms)
    }

    pub fn tool(&self) -> Duration {
        Duration::from_millis(self.tool_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            verification: VerificationConfig::default(),
            timeouts: TimeoutConfig::default(),
            fallback: FallbackPolicy::OpenBook,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.7,
            min_relevance: 0.7,
            expand: false,
            max_additional: 3,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_tokens: 512,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embed_ms: 10_000,
            search_ms: 10_000,
            expand_ms: 5_000,
            completion_ms: 120_000,
            stream_idle_ms: 30_000,
            tool_ms: 10_000,
        }
    }
}

impl PipelineConfig {
    /// Smaller context, no expansion, tight timeouts.
    pub fn fast() -> Self {
        Self {
            retrieval: RetrievalConfig {
                top_k: 3,
                expand: false,
                ..RetrievalConfig::default()
            },
            generation: GenerationConfig {
                max_tokens: 512,
                ..GenerationConfig::default()
            },
            verification: VerificationConfig {
                concurrency: 8,
                ..VerificationConfig::default()
            },
            timeouts: TimeoutConfig {
                completion_ms: 30_000,
                stream_idle_ms: 10_000,
                ..TimeoutConfig::default()
            },
            fallback: FallbackPolicy::OpenBook,
        }
    }

    /// Wider context with graph expansion; retrieval failures are fatal.
    pub fn accurate() -> Self {
        Self {
            retrieval: RetrievalConfig {
                top_k: 8,
                expand: true,
                max_additional: 5,
                ..RetrievalConfig::default()
            },
            generation: GenerationConfig {
                max_tokens: 2048,
                temperature: 0.0,
                ..GenerationConfig::default()
            },
            verification: VerificationConfig {
                concurrency: 2,
                ..VerificationConfig::default()
            },
            timeouts: TimeoutConfig {
                completion_ms: 240_000,
                ..TimeoutConfig::default()
            },
            fallback: FallbackPolicy::Strict,
        }
    }
}
