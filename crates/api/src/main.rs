mod config;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use index::Neo4jChunkStore;
use llm::OllamaProvider;
use query::{CourseTool, HttpCourseSearch, Metrics, RagService, selector_for};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, LogFormat, LoggingConfig};
use crate::routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().map_err(|e| anyhow!("Failed to load configuration: {}", e))?;
    init_logging(&config.logging);

    let pipeline = config.pipeline.clone();
    info!(mode = ?config.mode, fallback = ?pipeline.fallback, "Configuration loaded");

    // Connect to Neo4j
    let store = Arc::new(Neo4jChunkStore::connect(&config.neo4j).await?);
    if let Err(e) = store.ping().await {
        warn!(error = %e, "Neo4j is not answering yet, queries will fall back per policy");
    }

    // Create the model client
    let llm = Arc::new(
        OllamaProvider::new(config.ollama.clone()).context("Failed to build Ollama client")?,
    );

    let metrics = Metrics::new();
    let mut rag = RagService::new(llm.clone(), store.clone(), pipeline.clone())
        .with_observer(metrics.clone());

    if let Some(url) = &config.courses_url {
        let tool = CourseTool::new(
            selector_for(llm.clone()),
            Arc::new(HttpCourseSearch::new(url.clone())),
            pipeline.timeouts.tool(),
        );
        rag = rag.with_course_tool(tool);
        info!(url = %url, native_tools = config.ollama.native_tools, "Course search enabled");
    }

    let state = AppState {
        rag,
        metrics,
        store_health: store,
    };

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    info!("Server listening on http://{}", config.server.bind);

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
