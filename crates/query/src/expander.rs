use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use index::{Chunk, ChunkStore};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Widens a chunk set with graph-adjacent chunks. Best effort: a failed
/// lookup is skipped, never fatal.
#[derive(Clone)]
pub struct ContextExpander {
    store: Arc<dyn ChunkStore>,
    lookup_timeout: Duration,
}

impl ContextExpander {
    pub fn new(store: Arc<dyn ChunkStore>, lookup_timeout: Duration) -> Self {
        Self {
            store,
            lookup_timeout,
        }
    }

    /// Returns `chunks` followed by at most `max_additional` new chunks.
    ///
    /// Related chunks have no similarity score of their own and inherit the
    /// score of the seed that reached them.
    pub async fn expand(&self, chunks: Vec<Chunk>, max_additional: usize) -> Vec<Chunk> {
        if max_additional == 0 || chunks.is_empty() {
            return chunks;
        }

        let mut seen: HashSet<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let mut additional: Vec<Chunk> = Vec::new();

        for seed in &chunks {
            if additional.len() >= max_additional {
                break;
            }

            let lookup = self.store.get_related_chunks(&seed.id, max_additional);
            let related = match timeout(self.lookup_timeout, lookup).await {
                Ok(Ok(related)) => related,
                Ok(Err(e)) => {
                    warn!(chunk_id = %seed.id, error = %e, "Adjacency lookup failed, skipping");
                    continue;
                }
                Err(_) => {
                    warn!(
                        chunk_id = %seed.id,
                        timeout_ms = self.lookup_timeout.as_millis(),
                        "Adjacency lookup timed out, skipping"
                    );
                    continue;
                }
            };

            for candidate in related {
                if additional.len() >= max_additional {
                    break;
                }
                if seen.insert(candidate.id.clone()) {
                    additional.push(candidate.with_score(seed.score));
                }
            }
        }

        debug!(
            seeds = chunks.len(),
            added = additional.len(),
            "context expanded"
        );

        let mut expanded = chunks;
        expanded.extend(additional);
        expanded
    }
}
