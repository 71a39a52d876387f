use serde::{Deserialize, Serialize};

/// A fragment of an indexed page, scored against the active query.
///
/// Chunks are per-query snapshots: the pipeline filters, reorders and
/// extends sequences of them but never mutates one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    /// Position within the parent page.
    pub chunk_index: i64,
    pub page_id: String,
    pub score: f32,
    pub url: String,
    pub title: String,
    pub domain: String,
}

impl Chunk {
    /// Copy of this chunk carrying a different relevance score.
    pub fn with_score(&self, score: f32) -> Self {
        Self {
            score,
            ..self.clone()
        }
    }
}
