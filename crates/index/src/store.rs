use anyhow::Result;
use async_trait::async_trait;

use crate::chunk::Chunk;

/// Read side of the vector-capable graph store.
///
/// Implementations must be safe for concurrent use by many queries; they
/// hold pooled connections rather than single-threaded handles.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Nearest chunks by vector similarity, best first, none below `min_score`.
    async fn search_by_vector(
        &self,
        embedding: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<Chunk>>;

    /// Graph-adjacent chunks (same-page neighbours and explicit relations).
    ///
    /// Returned chunks carry a score of `0.0`; they have no similarity of
    /// their own.
    async fn get_related_chunks(&self, chunk_id: &str, limit: usize) -> Result<Vec<Chunk>>;
}
