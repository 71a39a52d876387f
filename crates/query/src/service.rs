use std::future::Future;
use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use index::ChunkStore;
use llm::{CompletionRequest, LlmProvider};
use tokio::time::timeout;
use tracing::{Instrument, Span, info, info_span, warn};
use verify::{HallucinationDetector, HallucinationReport};

use crate::config::{FallbackPolicy, PipelineConfig};
use crate::error::{GenerationError, PipelineError, RetrievalError};
use crate::events::{QueryEvent, QueryMetadata, QueryResponse};
use crate::observer::{NoopObserver, Operation, Outcome, PipelineObserver, TimedOperation};
use crate::prompt::{PromptBuilder, postprocess_answer};
use crate::retrieval::{RetrievalCoordinator, RetrievalResult};
use crate::tools::CourseTool;

/// Retrieval, prompt and request for one query, ready for generation.
struct Prepared {
    retrieval: RetrievalResult,
    request: CompletionRequest,
    open_book: bool,
}

/// Orchestrates retrieval, generation and verification for one query at a
/// time. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct RagService {
    llm: Arc<dyn LlmProvider>,
    coordinator: RetrievalCoordinator,
    prompts: PromptBuilder,
    detector: HallucinationDetector,
    courses: Option<CourseTool>,
    observer: Arc<dyn PipelineObserver>,
    config: Arc<PipelineConfig>,
}

impl RagService {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn ChunkStore>,
        config: PipelineConfig,
    ) -> Self {
        let coordinator =
            RetrievalCoordinator::new(llm.clone(), store, &config.retrieval, &config.timeouts);
        let detector = HallucinationDetector::new(
            llm.clone(),
            config.verification.concurrency,
            config.verification.max_tokens,
            config.timeouts.completion(),
        );

        Self {
            prompts: PromptBuilder::new(&config.generation),
            coordinator,
            detector,
            courses: None,
            observer: Arc::new(NoopObserver),
            config: Arc::new(config),
            llm,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Enable the course-search prompt section.
    pub fn with_course_tool(mut self, tool: CourseTool) -> Self {
        self.courses = Some(tool);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Answer `query` in one shot. `top_k` falls back to the configured value.
    pub async fn process_query(
        &self,
        query: &str,
        session_id: Option<String>,
        top_k: Option<usize>,
    ) -> Result<QueryResponse, PipelineError> {
        let span = operation_span(Operation::Query, session_id.as_deref());
        self.observe(
            Operation::Query,
            span,
            self.answer(query, session_id, top_k),
            |result: &Result<QueryResponse, PipelineError>| match result {
                Ok(_) => Outcome::Success,
                Err(_) => Outcome::Failure,
            },
        )
        .await
    }

    /// Answer `query` as a stream of events:
    /// `Context`, `Response`*, `Done`, `Complete`, or a single terminal `Error`.
    ///
    /// Dropping the stream early drops the provider stream with it.
    pub fn process_query_streaming(
        &self,
        query: &str,
        session_id: Option<String>,
        top_k: Option<usize>,
    ) -> BoxStream<'static, QueryEvent> {
        let span = operation_span(Operation::StreamQuery, session_id.as_deref());
        let events = self.clone().events(query.to_string(), session_id, top_k, span);
        self.observe_stream(Operation::StreamQuery, events)
    }

    /// Score how much of `response` is unsupported by `context`.
    pub async fn detect_hallucination(&self, response: &str, context: &str) -> HallucinationReport {
        let span = operation_span(Operation::HallucinationCheck, None);
        self.observe(
            Operation::HallucinationCheck,
            span,
            self.detector.detect(response, context),
            |_| Outcome::Success,
        )
        .await
    }

    async fn answer(
        &self,
        query: &str,
        session_id: Option<String>,
        top_k: Option<usize>,
    ) -> Result<QueryResponse, PipelineError> {
        let prepared = self.prepare(query, top_k).await?;

        let limit = self.config.timeouts.completion();
        let completion = timeout(limit, self.llm.complete(prepared.request))
            .await
            .map_err(|_| GenerationError::Timeout(limit))?
            .map_err(GenerationError::from)?;

        let answer = postprocess_answer(&completion.text);
        info!(
            chunks = prepared.retrieval.num_chunks,
            tokens = completion.token_count,
            open_book = prepared.open_book,
            "query answered"
        );

        Ok(QueryResponse {
            answer,
            metadata: QueryMetadata {
                session_id,
                num_chunks: prepared.retrieval.num_chunks,
                num_sources: prepared.retrieval.num_sources,
                model: completion.model,
                token_count: completion.token_count,
                provider: completion.provider,
                open_book: prepared.open_book,
            },
            sources: prepared.retrieval.sources,
        })
    }

    fn events(
        self,
        query: String,
        session_id: Option<String>,
        top_k: Option<usize>,
        span: Span,
    ) -> impl Stream<Item = QueryEvent> + Send + 'static {
        stream! {
            // Step 1: Retrieve context and build the request
            let prepared = match self.prepare(&query, top_k).instrument(span.clone()).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    yield error_event(e);
                    return;
                }
            };

            yield QueryEvent::Context {
                sources: prepared.retrieval.sources.clone(),
            };

            // Step 2: Open the provider stream
            let open_limit = self.config.timeouts.completion();
            let opened = timeout(open_limit, self.llm.stream_complete(prepared.request))
                .instrument(span.clone())
                .await;
            let mut tokens = match opened {
                Ok(Ok(tokens)) => tokens,
                Ok(Err(e)) => {
                    yield error_event(GenerationError::from(e));
                    return;
                }
                Err(_) => {
                    yield error_event(GenerationError::Timeout(open_limit));
                    return;
                }
            };

            // Step 3: Relay fragments, each under the idle timeout
            let idle = self.config.timeouts.stream_idle();
            let mut raw = String::new();
            let mut fragments: u32 = 0;
            loop {
                match timeout(idle, tokens.next()).await {
                    Ok(Some(Ok(fragment))) => {
                        if fragment.is_empty() {
                            continue;
                        }
                        fragments += 1;
                        raw.push_str(&fragment);
                        yield QueryEvent::Response { content: fragment };
                    }
                    Ok(Some(Err(e))) => {
                        yield error_event(GenerationError::from(e));
                        return;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        yield error_event(GenerationError::Timeout(idle));
                        return;
                    }
                }
            }
            drop(tokens);

            // Step 4: Summarise
            yield QueryEvent::Done;

            span.in_scope(|| {
                info!(
                    chunks = prepared.retrieval.num_chunks,
                    fragments,
                    open_book = prepared.open_book,
                    "streamed query answered"
                )
            });

            yield QueryEvent::Complete(QueryResponse {
                answer: postprocess_answer(&raw),
                metadata: QueryMetadata {
                    session_id,
                    num_chunks: prepared.retrieval.num_chunks,
                    num_sources: prepared.retrieval.num_sources,
                    model: self.llm.model().to_string(),
                    token_count: fragments,
                    provider: self.llm.name().to_string(),
                    open_book: prepared.open_book,
                },
                sources: prepared.retrieval.sources,
            });
        }
    }

    async fn prepare(&self, query: &str, top_k: Option<usize>) -> Result<Prepared, PipelineError> {
        let retrieval_config = &self.config.retrieval;
        let top_k = top_k.unwrap_or(retrieval_config.top_k);

        let retrieved = self
            .coordinator
            .retrieve_context(query, top_k, retrieval_config.expand, retrieval_config.min_score)
            .await;

        let retrieval = match retrieved {
            Ok(retrieval) => retrieval,
            Err(e @ RetrievalError::InvalidTopK) => return Err(e.into()),
            Err(e) => match self.config.fallback {
                FallbackPolicy::Strict => return Err(e.into()),
                FallbackPolicy::OpenBook => {
                    warn!(error = %e, "Retrieval failed, answering without context");
                    self.observer.on_fallback();
                    RetrievalResult::empty()
                }
            },
        };

        let tool_output = match &self.courses {
            Some(tool) => tool.run(query).await,
            None => None,
        };

        let request = self
            .prompts
            .build(&retrieval.context_text, query, tool_output.as_deref());

        Ok(Prepared {
            open_book: retrieval.is_empty(),
            retrieval,
            request,
        })
    }

    /// The observation boundary for one-shot operations.
    async fn observe<T, F>(
        &self,
        op: Operation,
        span: Span,
        operation: F,
        outcome: impl FnOnce(&T) -> Outcome,
    ) -> T
    where
        F: Future<Output = T>,
    {
        self.observer.on_start(op);
        let timer = TimedOperation::start();

        let result = operation.instrument(span).await;

        self.observer.on_finish(op, outcome(&result), timer.elapsed());
        result
    }

    /// The observation boundary for streamed operations. The outcome is read
    /// off the terminal event; a stream dropped before one is `Cancelled`.
    fn observe_stream(
        &self,
        op: Operation,
        events: impl Stream<Item = QueryEvent> + Send + 'static,
    ) -> BoxStream<'static, QueryEvent> {
        self.observer.on_start(op);
        let mut finish = FinishGuard {
            observer: self.observer.clone(),
            op,
            timer: TimedOperation::start(),
            outcome: None,
        };

        events
            .map(move |event| {
                match &event {
                    QueryEvent::Response { .. } => finish.observer.on_fragment(),
                    QueryEvent::Complete(_) => finish.outcome = Some(Outcome::Success),
                    QueryEvent::Error { .. } => finish.outcome = Some(Outcome::Failure),
                    QueryEvent::Context { .. } | QueryEvent::Done => {}
                }
                event
            })
            .boxed()
    }
}

/// Reports the end of a streamed operation when the stream is dropped.
struct FinishGuard {
    observer: Arc<dyn PipelineObserver>,
    op: Operation,
    timer: TimedOperation,
    outcome: Option<Outcome>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.unwrap_or(Outcome::Cancelled);
        self.observer.on_finish(self.op, outcome, self.timer.elapsed());
    }
}

fn operation_span(op: Operation, session_id: Option<&str>) -> Span {
    info_span!("rag", op = op.as_str(), session_id = session_id.unwrap_or("-"))
}

fn error_event(error: impl Into<PipelineError>) -> QueryEvent {
    let error = error.into();
    warn!(error = %error, "Streamed query failed");
    QueryEvent::Error {
        message: error.to_string(),
    }
}
