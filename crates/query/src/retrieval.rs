use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use index::{Chunk, ChunkStore};
use llm::LlmProvider;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use crate::config::{RetrievalConfig, TimeoutConfig};
use crate::error::RetrievalError;
use crate::expander::ContextExpander;
use crate::ranker::ContextRanker;

/// A page that contributed at least one chunk to the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunks: Vec<Chunk>,
    pub sources: Vec<Source>,
    pub context_text: String,
    pub num_chunks: usize,
    pub num_sources: usize,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::from_ranked(Vec::new())
    }

    fn from_ranked(chunks: Vec<Chunk>) -> Self {
        let context_text = format_context(&chunks);
        let sources = dedupe_sources(&chunks);
        Self {
            num_chunks: chunks.len(),
            num_sources: sources.len(),
            chunks,
            sources,
            context_text,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// `[Source N] <text> (<url>)` per chunk, rank order, blank-line separated.
pub fn format_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[Source {}] {} ({})", i + 1, chunk.text.trim(), chunk.url))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One source per page, in first-seen order.
pub fn dedupe_sources(chunks: &[Chunk]) -> Vec<Source> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .filter(|chunk| seen.insert(chunk.page_id.as_str()))
        .map(|chunk| Source {
            url: chunk.url.clone(),
            title: chunk.title.clone(),
            domain: chunk.domain.clone(),
        })
        .collect()
}

/// Embeds the query, searches, expands, ranks and formats.
#[derive(Clone)]
pub struct RetrievalCoordinator {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn ChunkStore>,
    expander: ContextExpander,
    ranker: ContextRanker,
    max_additional: usize,
    embed_timeout: Duration,
    search_timeout: Duration,
}

impl RetrievalCoordinator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn ChunkStore>,
        config: &RetrievalConfig,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            expander: ContextExpander::new(store.clone(), timeouts.expand()),
            ranker: ContextRanker::new(config.min_relevance),
            max_additional: config.max_additional,
            embed_timeout: timeouts.embed(),
            search_timeout: timeouts.search(),
            llm,
            store,
        }
    }

    pub async fn retrieve_context(
        &self,
        query: &str,
        top_k: usize,
        expand: bool,
        min_score: f32,
    ) -> Result<RetrievalResult, RetrievalError> {
        if top_k == 0 {
            return Err(RetrievalError::InvalidTopK);
        }

        let embedding = timeout(self.embed_timeout, self.llm.embed(query))
            .await
            .map_err(|_| RetrievalError::Timeout {
                stage: "embedding",
                after: self.embed_timeout,
            })?
            .map_err(RetrievalError::Embedding)?;

        let found = timeout(
            self.search_timeout,
            self.store.search_by_vector(&embedding, top_k, min_score),
        )
        .await
        .map_err(|_| RetrievalError::Timeout {
            stage: "vector search",
            after: self.search_timeout,
        })?
        .map_err(RetrievalError::Search)?;

        if found.is_empty() {
            debug!(top_k, min_score, "no chunks above min_score");
            return Ok(RetrievalResult::empty());
        }

        let retrieved = found.len();
        let candidates = if expand {
            self.expander.expand(found, self.max_additional).await
        } else {
            found
        };

        let ranked = self.ranker.rank(candidates, query);
        let result = RetrievalResult::from_ranked(ranked);

        debug!(
            retrieved,
            kept = result.num_chunks,
            sources = result.num_sources,
            context_size = result.context_text.len(),
            "context retrieved"
        );

        Ok(result)
    }
}
