pub mod config;
pub mod error;
pub mod events;
pub mod expander;
pub mod observer;
pub mod prompt;
pub mod ranker;
pub mod retrieval;
pub mod service;
pub mod tools;

pub use config::{FallbackPolicy, PipelineConfig};
pub use error::{GenerationError, PipelineError, RetrievalError};
pub use events::{QueryEvent, QueryMetadata, QueryResponse};
pub use expander::ContextExpander;
pub use observer::{Metrics, MetricsSnapshot, NoopObserver, Operation, Outcome, PipelineObserver};
pub use prompt::{PromptBuilder, postprocess_answer};
pub use ranker::ContextRanker;
pub use retrieval::{RetrievalCoordinator, RetrievalResult, Source};
pub use service::RagService;
pub use tools::{CourseSearch, CourseTool, HttpCourseSearch, selector_for};
