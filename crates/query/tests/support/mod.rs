#![allow(dead_code)]

use std::collections::HashMap;
use std::future::pending;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_stream::stream;
use async_trait::async_trait;
use index::{Chunk, ChunkStore};
use llm::{Completion, CompletionRequest, LlmError, LlmProvider, TokenStream};

pub const WEAVE_ANSWER: &str =
    "Weave is a lightweight toolkit for tracking and evaluating LLM applications.";

pub fn chunk(id: &str, page: &str, score: f32, text: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: text.to_string(),
        chunk_index: 0,
        page_id: page.to_string(),
        score,
        url: format!("https://docs.example.com/{page}"),
        title: format!("Page {page}"),
        domain: "docs.example.com".to_string(),
    }
}

pub fn weave_corpus() -> Vec<Chunk> {
    vec![
        chunk("c1", "weave", 0.95, "Weave is a lightweight toolkit for tracking LLM applications."),
        chunk("c2", "weave", 0.90, "Weave records traces of every LLM call."),
        chunk("c3", "evals", 0.86, "Weave evaluations score model outputs."),
        chunk("c4", "models", 0.81, "Weave models version prompts and parameters."),
        chunk("c5", "misc", 0.40, "Unrelated text about billing."),
    ]
}

/// In-memory chunk store: search filters on the stored scores, adjacency is
/// an explicit map.
#[derive(Default)]
pub struct MemoryStore {
    pub chunks: Vec<Chunk>,
    pub related: HashMap<String, Vec<Chunk>>,
    pub fail: bool,
    /// Searches never return.
    pub hang: bool,
}

impl MemoryStore {
    pub fn with_chunks(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn search_by_vector(
        &self,
        _embedding: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<Chunk>> {
        if self.hang {
            pending::<()>().await;
        }
        if self.fail {
            bail!("connection refused");
        }
        let mut found: Vec<Chunk> = self
            .chunks
            .iter()
            .filter(|c| c.score >= min_score)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.score.total_cmp(&a.score));
        found.truncate(limit);
        Ok(found)
    }

    async fn get_related_chunks(&self, chunk_id: &str, limit: usize) -> Result<Vec<Chunk>> {
        Ok(self
            .related
            .get(chunk_id)
            .map(|r| r.iter().take(limit).map(|c| c.with_score(0.0)).collect())
            .unwrap_or_default())
    }
}

/// Sets its flag when dropped.
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Deterministic provider. Answers are fixed; streams split them into
/// word-sized fragments.
pub struct ScriptedModel {
    pub answer: String,
    pub fail_embed: bool,
    pub hang_embed: bool,
    pub fail_complete: bool,
    pub fail_stream_open: bool,
    /// Yield an error after this many fragments.
    pub fail_stream_after: Option<usize>,
    /// Go silent, without ending the stream, after this many fragments.
    pub stall_stream_after: Option<usize>,
    pub prompts: Mutex<Vec<String>>,
    pub stream_dropped: Arc<AtomicBool>,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            fail_embed: false,
            hang_embed: false,
            fail_complete: false,
            fail_stream_open: false,
            fail_stream_after: None,
            stall_stream_after: None,
            prompts: Mutex::new(Vec::new()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }

    fn record(&self, request: &CompletionRequest) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
    }

    fn fragments(&self) -> Vec<String> {
        self.answer
            .split_inclusive(' ')
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl LlmProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if self.hang_embed {
            pending::<()>().await;
        }
        if self.fail_embed {
            return Err(LlmError::Unsupported("embeddings"));
        }
        Ok(vec![text.len() as f32, 1.0, 0.0])
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        self.record(&request);
        if self.fail_complete {
            return Err(LlmError::Status {
                provider: "scripted".to_string(),
                status: 500,
                body: "model crashed".to_string(),
            });
        }
        Ok(Completion {
            text: format!("Answer: {}\n", self.answer),
            token_count: self.fragments().len() as u32,
            model: "scripted-1".to_string(),
            provider: "scripted".to_string(),
        })
    }

    async fn stream_complete(&self, request: CompletionRequest) -> Result<TokenStream, LlmError> {
        self.record(&request);
        if self.fail_stream_open {
            return Err(LlmError::EmptyResponse);
        }

        let fragments = self.fragments();
        let fail_after = self.fail_stream_after;
        let stall_after = self.stall_stream_after;
        let guard = DropFlag(self.stream_dropped.clone());

        let tokens = stream! {
            let _guard = guard;
            for (i, fragment) in fragments.into_iter().enumerate() {
                if fail_after == Some(i) {
                    yield Err(LlmError::EmptyResponse);
                    return;
                }
                if stall_after == Some(i) {
                    pending::<()>().await;
                }
                yield Ok(fragment);
            }
        };
        let tokens: TokenStream = Box::pin(tokens);
        Ok(tokens)
    }
}
