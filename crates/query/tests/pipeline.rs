mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use index::ChunkStore;
use llm::LlmProvider;
use query::tools::Course;
use query::{
    CourseSearch, CourseTool, FallbackPolicy, Metrics, PipelineConfig, PipelineError, QueryEvent,
    RagService, RetrievalError, selector_for,
};

use support::{MemoryStore, ScriptedModel, WEAVE_ANSWER, chunk, weave_corpus};

fn service(model: &Arc<ScriptedModel>, store: MemoryStore, config: PipelineConfig) -> RagService {
    let llm: Arc<dyn LlmProvider> = model.clone();
    let store: Arc<dyn ChunkStore> = Arc::new(store);
    RagService::new(llm, store, config)
}

fn kinds(events: &[QueryEvent]) -> Vec<&'static str> {
    events.iter().map(QueryEvent::kind).collect()
}

#[tokio::test]
async fn answers_from_retrieved_context() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default());

    let response = rag
        .process_query("What is Weave?", Some("s-1".to_string()), Some(3))
        .await
        .unwrap();

    assert!(!response.answer.is_empty());
    assert!(!response.answer.to_lowercase().starts_with("answer:"));
    assert!(response.metadata.num_chunks > 0);
    assert!(response.sources.len() <= 3);
    assert_eq!(response.metadata.session_id.as_deref(), Some("s-1"));
    assert_eq!(response.metadata.provider, "scripted");
    assert!(!response.metadata.open_book);

    let prompt = model.last_prompt().unwrap();
    assert!(prompt.starts_with("Context:\n[Source 1] Weave is a lightweight toolkit"));
    assert!(prompt.ends_with("\n\nQuestion:\nWhat is Weave?"));
}

#[tokio::test]
async fn sources_are_unique_per_page() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default());

    let response = rag.process_query("What is Weave?", None, Some(4)).await.unwrap();

    let urls: Vec<_> = response.sources.iter().map(|s| s.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://docs.example.com/weave",
            "https://docs.example.com/evals",
            "https://docs.example.com/models",
        ]
    );
    assert_eq!(response.metadata.num_chunks, 4);
    assert_eq!(response.metadata.num_sources, 3);
}

#[tokio::test]
async fn empty_corpus_answers_open_book() {
    let model = Arc::new(ScriptedModel::answering("I could not find that in the documentation."));
    let rag = service(&model, MemoryStore::default(), PipelineConfig::default());

    let response = rag.process_query("What is Weave?", None, Some(3)).await.unwrap();

    assert!(!response.answer.is_empty());
    assert!(response.sources.is_empty());
    assert_eq!(response.metadata.num_chunks, 0);
    assert!(response.metadata.open_book);
    assert_eq!(model.last_prompt().unwrap(), "Context:\n\n\nQuestion:\nWhat is Weave?");
}

#[tokio::test]
async fn repeated_queries_give_identical_responses() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default());

    let first = rag.process_query("What is Weave?", None, Some(3)).await.unwrap();
    let second = rag.process_query("What is Weave?", None, Some(3)).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn store_failure_falls_back_to_open_book() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let metrics = Metrics::new();
    let rag = service(&model, MemoryStore::failing(), PipelineConfig::default())
        .with_observer(metrics.clone());

    let response = rag.process_query("What is Weave?", None, None).await.unwrap();

    assert!(response.metadata.open_book);
    assert!(response.sources.is_empty());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.open_book_fallbacks, 1);
    assert_eq!(snapshot.successful_requests, 1);
}

#[tokio::test]
async fn store_failure_is_fatal_in_strict_mode() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let config = PipelineConfig {
        fallback: FallbackPolicy::Strict,
        ..PipelineConfig::default()
    };
    let metrics = Metrics::new();
    let rag = service(&model, MemoryStore::failing(), config).with_observer(metrics.clone());

    let err = rag.process_query("What is Weave?", None, None).await.unwrap_err();

    assert!(matches!(err, PipelineError::Retrieval(RetrievalError::Search(_))));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    assert_eq!(metrics.snapshot().failed_requests, 1);
}

#[tokio::test]
async fn zero_top_k_is_rejected() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default());

    let err = rag.process_query("What is Weave?", None, Some(0)).await.unwrap_err();

    assert!(matches!(err, PipelineError::Retrieval(RetrievalError::InvalidTopK)));
}

#[tokio::test]
async fn generation_failure_surfaces() {
    let mut model = ScriptedModel::answering(WEAVE_ANSWER);
    model.fail_complete = true;
    let model = Arc::new(model);
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default());

    let err = rag.process_query("What is Weave?", None, None).await.unwrap_err();

    assert!(matches!(err, PipelineError::Generation(_)));
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expansion_adds_neighbours() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let mut store = MemoryStore::with_chunks(weave_corpus());
    store.related.insert(
        "c1".to_string(),
        vec![chunk("c1b", "weave", 0.0, "Weave is installed with pip.")],
    );
    let mut config = PipelineConfig::default();
    config.retrieval.expand = true;
    let rag = service(&model, store, config);

    let response = rag.process_query("What is Weave?", None, Some(1)).await.unwrap();

    assert_eq!(response.metadata.num_chunks, 2);
    assert_eq!(response.metadata.num_sources, 1);
    assert!(model.last_prompt().unwrap().contains("[Source 2] Weave is installed with pip."));
}

#[tokio::test]
async fn stream_emits_events_in_order() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default());

    let events: Vec<QueryEvent> = rag
        .process_query_streaming("What is Weave?", Some("s-2".to_string()), Some(3))
        .collect()
        .await;

    let kinds = kinds(&events);
    assert_eq!(kinds.first(), Some(&"context"));
    assert_eq!(&kinds[kinds.len() - 2..], &["done", "complete"]);
    assert!(kinds[1..kinds.len() - 2].iter().all(|k| *k == "response"));
    assert!(kinds.len() > 3);

    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            QueryEvent::Response { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();

    let Some(QueryEvent::Complete(response)) = events.last() else {
        panic!("stream did not complete");
    };
    assert_eq!(streamed, WEAVE_ANSWER);
    assert_eq!(response.answer, WEAVE_ANSWER);
    assert_eq!(response.metadata.session_id.as_deref(), Some("s-2"));
    assert_eq!(response.metadata.model, "scripted-1");
    assert_eq!(response.metadata.token_count as usize, kinds.len() - 3);

    let QueryEvent::Context { sources } = &events[0] else {
        panic!("first event is not context");
    };
    assert_eq!(sources, &response.sources);
}

#[tokio::test]
async fn dropping_the_stream_cancels_generation() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let metrics = Metrics::new();
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default())
        .with_observer(metrics.clone());

    let mut stream = rag.process_query_streaming("What is Weave?", None, Some(3));
    let mut seen = Vec::new();
    while let Some(event) = stream.next().await {
        let is_response = matches!(event, QueryEvent::Response { .. });
        seen.push(event);
        if is_response {
            break;
        }
    }
    drop(stream);

    assert_eq!(kinds(&seen), vec!["context", "response"]);
    assert!(!seen.iter().any(|e| matches!(e, QueryEvent::Complete(_))));
    assert!(model.stream_dropped.load(Ordering::SeqCst));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.cancelled_streams, 1);
    assert_eq!(snapshot.successful_requests, 0);
    assert_eq!(snapshot.fragments_streamed, 1);
}

#[tokio::test]
async fn stream_open_failure_is_a_single_error_event() {
    let mut model = ScriptedModel::answering(WEAVE_ANSWER);
    model.fail_stream_open = true;
    let model = Arc::new(model);
    let metrics = Metrics::new();
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default())
        .with_observer(metrics.clone());

    let events: Vec<QueryEvent> = rag
        .process_query_streaming("What is Weave?", None, None)
        .collect()
        .await;

    assert_eq!(kinds(&events), vec!["context", "error"]);
    assert_eq!(metrics.snapshot().failed_requests, 1);
}

#[tokio::test]
async fn mid_stream_failure_ends_with_error() {
    let mut model = ScriptedModel::answering(WEAVE_ANSWER);
    model.fail_stream_after = Some(2);
    let model = Arc::new(model);
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default());

    let events: Vec<QueryEvent> = rag
        .process_query_streaming("What is Weave?", None, None)
        .collect()
        .await;

    assert_eq!(kinds(&events), vec!["context", "response", "response", "error"]);
}

#[tokio::test]
async fn strict_stream_retrieval_failure_is_an_error_event() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let config = PipelineConfig {
        fallback: FallbackPolicy::Strict,
        ..PipelineConfig::default()
    };
    let rag = service(&model, MemoryStore::failing(), config);

    let events: Vec<QueryEvent> = rag
        .process_query_streaming("What is Weave?", None, None)
        .collect()
        .await;

    assert_eq!(kinds(&events), vec!["error"]);
    let QueryEvent::Error { message } = &events[0] else {
        unreachable!();
    };
    assert!(message.contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn search_timeout_falls_back_to_open_book() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let metrics = Metrics::new();
    let rag = service(&model, MemoryStore::hanging(), PipelineConfig::default())
        .with_observer(metrics.clone());

    let response = rag.process_query("What is Weave?", None, None).await.unwrap();

    assert!(response.metadata.open_book);
    assert_eq!(response.metadata.num_chunks, 0);
    assert_eq!(metrics.snapshot().open_book_fallbacks, 1);
    assert_eq!(model.last_prompt().unwrap(), "Context:\n\n\nQuestion:\nWhat is Weave?");
}

#[tokio::test(start_paused = true)]
async fn search_timeout_is_fatal_in_strict_mode() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let config = PipelineConfig {
        fallback: FallbackPolicy::Strict,
        ..PipelineConfig::default()
    };
    let search_limit = config.timeouts.search();
    let rag = service(&model, MemoryStore::hanging(), config);

    let err = rag.process_query("What is Weave?", None, None).await.unwrap_err();

    match err {
        PipelineError::Retrieval(RetrievalError::Timeout { stage, after }) => {
            assert_eq!(stage, "vector search");
            assert_eq!(after, search_limit);
        }
        other => panic!("expected a search timeout, got {other:?}"),
    }
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn embedding_failure_falls_back_to_open_book() {
    let mut model = ScriptedModel::answering(WEAVE_ANSWER);
    model.fail_embed = true;
    let model = Arc::new(model);
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default());

    let response = rag.process_query("What is Weave?", None, None).await.unwrap();

    assert!(response.metadata.open_book);
    assert!(response.sources.is_empty());
}

#[tokio::test]
async fn embedding_failure_is_fatal_in_strict_mode() {
    let mut model = ScriptedModel::answering(WEAVE_ANSWER);
    model.fail_embed = true;
    let model = Arc::new(model);
    let config = PipelineConfig {
        fallback: FallbackPolicy::Strict,
        ..PipelineConfig::default()
    };
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), config);

    let err = rag.process_query("What is Weave?", None, None).await.unwrap_err();

    assert!(matches!(err, PipelineError::Retrieval(RetrievalError::Embedding(_))));
}

#[tokio::test(start_paused = true)]
async fn embedding_timeout_names_its_stage() {
    let mut model = ScriptedModel::answering(WEAVE_ANSWER);
    model.hang_embed = true;
    let model = Arc::new(model);
    let config = PipelineConfig {
        fallback: FallbackPolicy::Strict,
        ..PipelineConfig::default()
    };
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), config);

    let err = rag.process_query("What is Weave?", None, None).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Retrieval(RetrievalError::Timeout { stage: "embedding", .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn stalled_stream_ends_with_one_error_event() {
    let mut model = ScriptedModel::answering(WEAVE_ANSWER);
    model.stall_stream_after = Some(2);
    let model = Arc::new(model);
    let metrics = Metrics::new();
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default())
        .with_observer(metrics.clone());

    let events: Vec<QueryEvent> = rag
        .process_query_streaming("What is Weave?", None, None)
        .collect()
        .await;

    assert_eq!(kinds(&events), vec!["context", "response", "response", "error"]);
    let Some(QueryEvent::Error { message }) = events.last() else {
        panic!("stream did not end with an error");
    };
    assert!(message.contains("timed out"));
    assert!(model.stream_dropped.load(Ordering::SeqCst));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.failed_requests, 1);
    assert_eq!(snapshot.successful_requests, 0);
}

struct Catalogue;

#[async_trait]
impl CourseSearch for Catalogue {
    async fn search(&self, topic: &str, _limit: usize) -> Result<Vec<Course>> {
        Ok(vec![Course {
            title: format!("Intro to {topic}"),
            url: "https://courses.example.com/1".to_string(),
            description: String::new(),
        }])
    }
}

#[tokio::test]
async fn course_results_are_added_to_the_prompt() {
    let model = Arc::new(ScriptedModel::answering(WEAVE_ANSWER));
    let llm: Arc<dyn LlmProvider> = model.clone();
    let tool = CourseTool::new(selector_for(llm), Arc::new(Catalogue), Duration::from_secs(1));
    let rag = service(&model, MemoryStore::with_chunks(weave_corpus()), PipelineConfig::default())
        .with_course_tool(tool);

    rag.process_query("Are there courses about prompt engineering?", None, Some(2))
        .await
        .unwrap();

    let prompt = model.last_prompt().unwrap();
    assert!(
        prompt.contains("Courses:\n- Intro to prompt engineering (https://courses.example.com/1)")
    );
}
