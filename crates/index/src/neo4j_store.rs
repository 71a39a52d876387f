use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Query, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunk::Chunk;
use crate::store::ChunkStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jStoreConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: usize,
    /// Name of the vector index over `Chunk.embedding`.
    pub vector_index: String,
}

impl Default for Neo4jStoreConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "neo4j".to_string(),
            database: "neo4j".to_string(),
            max_connections: 16,
            vector_index: "chunk_embeddings".to_string(),
        }
    }
}

/// Chunk store over the page graph:
/// `(:Page)-[:HAS_CHUNK]->(:Chunk)`, `(:Chunk)-[:NEXT_CHUNK]->(:Chunk)`,
/// `(:Chunk)-[:RELATED_TO]-(:Chunk)`.
#[derive(Clone)]
pub struct Neo4jChunkStore {
    graph: Graph,
    vector_index: String,
}

impl Neo4jChunkStore {
    pub fn new(graph: Graph, vector_index: impl Into<String>) -> Self {
        Self {
            graph,
            vector_index: vector_index.into(),
        }
    }

    /// Open the connection pool. Called once at process start.
    pub async fn connect(config: &Neo4jStoreConfig) -> Result<Self> {
        let neo4j_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .db(config.database.as_str())
            .max_connections(config.max_connections)
            .build()
            .context("Invalid Neo4j configuration")?;

        let graph = Graph::connect(neo4j_config)
            .await
            .context("Failed to connect to Neo4j")?;

        Ok(Self::new(graph, config.vector_index.clone()))
    }

    pub async fn ping(&self) -> Result<()> {
        self.graph
            .run(neo4rs::query("RETURN 1"))
            .await
            .context("Neo4j health check failed")
    }

    async fn fetch_chunks(&self, query: Query) -> Result<Vec<Chunk>> {
        let mut result = self.graph.execute(query).await?;
        let mut chunks = Vec::new();

        while let Some(row) = result.next().await? {
            chunks.push(row_to_chunk(&row)?);
        }

        Ok(chunks)
    }
}

fn row_to_chunk(row: &Row) -> Result<Chunk> {
    Ok(Chunk {
        id: row.get("id").context("chunk row missing id")?,
        text: row.get("text").unwrap_or_default(),
        chunk_index: row.get::<i64>("chunk_index").unwrap_or(0),
        page_id: row.get("page_id").unwrap_or_default(),
        score: row.get::<f64>("score").unwrap_or(0.0) as f32,
        url: row.get("url").unwrap_or_default(),
        title: row.get("title").unwrap_or_default(),
        domain: row.get("domain").unwrap_or_default(),
    })
}

#[async_trait]
impl ChunkStore for Neo4jChunkStore {
    async fn search_by_vector(
        &self,
        embedding: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<Chunk>> {
        let vector: Vec<f64> = embedding.iter().map(|v| f64::from(*v)).collect();

        let query = Query::new(
            r#"
            CALL db.index.vector.queryNodes($index, $limit, $embedding)
            YIELD node AS chunk, score
            WHERE score >= $min_score
            MATCH (page:Page)-[:HAS_CHUNK]->(chunk)
            RETURN chunk.id AS id, chunk.text AS text, chunk.chunk_index AS chunk_index,
                   page.id AS page_id, page.url AS url, page.title AS title,
                   page.domain AS domain, score
            ORDER BY score DESC
            "#
            .to_string(),
        )
        .param("index", self.vector_index.clone())
        .param("limit", limit as i64)
        .param("embedding", vector)
        .param("min_score", f64::from(min_score));

        let chunks = self
            .fetch_chunks(query)
            .await
            .context("Vector search failed")?;

        debug!(limit, min_score, found = chunks.len(), "vector search");
        Ok(chunks)
    }

    async fn get_related_chunks(&self, chunk_id: &str, limit: usize) -> Result<Vec<Chunk>> {
        let query = Query::new(
            r#"
            MATCH (seed:Chunk {id: $chunk_id})-[:NEXT_CHUNK|RELATED_TO]-(related:Chunk)
            WHERE related.id <> $chunk_id
            MATCH (page:Page)-[:HAS_CHUNK]->(related)
            RETURN DISTINCT related.id AS id, related.text AS text,
                   related.chunk_index AS chunk_index, page.id AS page_id,
                   page.url AS url, page.title AS title, page.domain AS domain,
                   0.0 AS score
            LIMIT $limit
            "#
            .to_string(),
        )
        .param("chunk_id", chunk_id.to_string())
        .param("limit", limit as i64);

        self.fetch_chunks(query)
            .await
            .with_context(|| format!("Adjacency lookup failed for chunk {chunk_id}"))
    }
}
