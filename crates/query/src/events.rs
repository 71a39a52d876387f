use serde::{Deserialize, Serialize};

use crate::retrieval::Source;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub session_id: Option<String>,
    pub num_chunks: usize,
    pub num_sources: usize,
    pub model: String,
    pub token_count: u32,
    pub provider: String,
    /// Set when the answer was generated without any retrieved context.
    pub open_book: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub metadata: QueryMetadata,
}

/// One step of a streamed query, in emission order:
/// `Context`, `Response`*, `Done`, `Complete`. `Error` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueryEvent {
    Context { sources: Vec<Source> },
    Response { content: String },
    Done,
    Complete(QueryResponse),
    Error { message: String },
}

impl QueryEvent {
    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryEvent::Context { .. } => "context",
            QueryEvent::Response { .. } => "response",
            QueryEvent::Done => "done",
            QueryEvent::Complete(_) => "complete",
            QueryEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryEvent::Complete(_) | QueryEvent::Error { .. })
    }
}
