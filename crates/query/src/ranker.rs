use index::Chunk;

/// Filters and orders candidate chunks by relevance score.
#[derive(Debug, Clone)]
pub struct ContextRanker {
    min_relevance: f32,
}

impl Default for ContextRanker {
    fn default() -> Self {
        Self::new(0.7)
    }
}

impl ContextRanker {
    pub fn new(min_relevance: f32) -> Self {
        Self { min_relevance }
    }

    pub fn min_relevance(&self) -> f32 {
        self.min_relevance
    }

    /// Drop chunks below the relevance floor and sort the rest best-first.
    ///
    /// The sort is stable, so equal scores keep their retrieval order. The
    /// query is accepted for rankers that rescore; this one does not.
    pub fn rank(&self, chunks: Vec<Chunk>, _query: &str) -> Vec<Chunk> {
        // NaN fails the comparison and is dropped here
        let mut kept: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| c.score >= self.min_relevance)
            .collect();

        kept.sort_by(|a, b| b.score.total_cmp(&a.score));
        kept
    }
}
