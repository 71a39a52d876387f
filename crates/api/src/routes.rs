use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use index::Neo4jChunkStore;
use query::{
    Metrics, MetricsSnapshot, PipelineError, QueryResponse, RagService, RetrievalError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;
use verify::HallucinationReport;

/// Liveness of an external dependency.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<()>;
}

#[async_trait]
impl HealthCheck for Neo4jChunkStore {
    async fn check(&self) -> Result<()> {
        self.ping().await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub rag: RagService,
    pub metrics: Arc<Metrics>,
    pub store_health: Arc<dyn HealthCheck>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/query", post(query))
        .route("/query/stream", post(query_stream))
        .route("/hallucination", post(detect_hallucination))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    neo4j: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub session_id: Option<String>,
    pub top_k: Option<usize>,
}

impl QueryRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.query.trim().is_empty() {
            return Err(ApiError::BadRequest("query must not be empty".to_string()));
        }
        Ok(())
    }

    /// Callers without a session get a fresh one so logs can be correlated.
    fn session(&self) -> String {
        self.session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct HallucinationRequest {
    pub response: String,
    pub context: String,
}

pub enum ApiError {
    BadRequest(String),
    Pipeline(PipelineError),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Pipeline(e) => {
                let status = match &e {
                    PipelineError::Retrieval(RetrievalError::InvalidTopK) => {
                        StatusCode::BAD_REQUEST
                    }
                    PipelineError::Retrieval(_) => StatusCode::SERVICE_UNAVAILABLE,
                    PipelineError::Generation(_) => StatusCode::BAD_GATEWAY,
                };
                warn!(status = status.as_u16(), error = %e, "Query failed");
                (status, e.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.store_health.check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                neo4j: "ok".to_string(),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                neo4j: format!("error: {:#}", e),
            }),
        ),
    }
}

async fn query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    req.validate()?;

    let response = state
        .rag
        .process_query(&req.query, Some(req.session()), req.top_k)
        .await?;

    Ok(Json(response))
}

/// One SSE event per pipeline event; the SSE event name is the event type.
async fn query_stream(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    req.validate()?;

    let events = state
        .rag
        .process_query_streaming(&req.query, Some(req.session()), req.top_k)
        .map(|event| {
            let sse = Event::default()
                .event(event.kind())
                .json_data(&event)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to encode stream event");
                    Event::default()
                        .event("error")
                        .data(r#"{"type":"error","message":"event encoding failed"}"#)
                });
            Ok::<_, Infallible>(sse)
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn detect_hallucination(
    State(state): State<AppState>,
    Json(req): Json<HallucinationRequest>,
) -> Json<HallucinationReport> {
    Json(state.rag.detect_hallucination(&req.response, &req.context).await)
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
