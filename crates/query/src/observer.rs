use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Query,
    StreamQuery,
    HallucinationCheck,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Query => "process_query",
            Operation::StreamQuery => "process_query_streaming",
            Operation::HallucinationCheck => "detect_hallucination",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    /// The consumer dropped a stream before it finished.
    Cancelled,
}

/// Hooks invoked at the `RagService` boundary for every public operation.
pub trait PipelineObserver: Send + Sync {
    fn on_start(&self, _op: Operation) {}

    fn on_finish(&self, _op: Operation, _outcome: Outcome, _elapsed: Duration) {}

    /// Retrieval failed and the query continued without context.
    fn on_fallback(&self) {}

    fn on_fragment(&self) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    cancelled_streams: AtomicUsize,
    open_book_fallbacks: AtomicUsize,
    fragments_streamed: AtomicUsize,

    // Timing (in microseconds)
    total_query_time_us: AtomicU64,
    total_stream_time_us: AtomicU64,
    total_check_time_us: AtomicU64,

    // Counts per operation
    queries: AtomicUsize,
    streams: AtomicUsize,
    checks: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            cancelled_streams: AtomicUsize::new(0),
            open_book_fallbacks: AtomicUsize::new(0),
            fragments_streamed: AtomicUsize::new(0),
            total_query_time_us: AtomicU64::new(0),
            total_stream_time_us: AtomicU64::new(0),
            total_check_time_us: AtomicU64::new(0),
            queries: AtomicUsize::new(0),
            streams: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
        })
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            cancelled_streams: self.cancelled_streams.load(Ordering::Relaxed),
            open_book_fallbacks: self.open_book_fallbacks.load(Ordering::Relaxed),
            fragments_streamed: self.fragments_streamed.load(Ordering::Relaxed),
            hallucination_checks: self.checks.load(Ordering::Relaxed),
            avg_query_time_ms: avg_time_ms(&self.total_query_time_us, &self.queries),
            avg_stream_time_ms: avg_time_ms(&self.total_stream_time_us, &self.streams),
            avg_check_time_ms: avg_time_ms(&self.total_check_time_us, &self.checks),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

impl PipelineObserver for Metrics {
    fn on_start(&self, _op: Operation) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn on_finish(&self, op: Operation, outcome: Outcome, elapsed: Duration) {
        match outcome {
            Outcome::Success => self.successful_requests.fetch_add(1, Ordering::Relaxed),
            Outcome::Failure => self.failed_requests.fetch_add(1, Ordering::Relaxed),
            Outcome::Cancelled => self.cancelled_streams.fetch_add(1, Ordering::Relaxed),
        };

        let (total, count) = match op {
            Operation::Query => (&self.total_query_time_us, &self.queries),
            Operation::StreamQuery => (&self.total_stream_time_us, &self.streams),
            Operation::HallucinationCheck => (&self.total_check_time_us, &self.checks),
        };
        total.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        count.fetch_add(1, Ordering::Relaxed);
    }

    fn on_fallback(&self) {
        self.open_book_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    fn on_fragment(&self) {
        self.fragments_streamed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub cancelled_streams: usize,
    pub open_book_fallbacks: usize,
    pub fragments_streamed: usize,
    pub hallucination_checks: usize,
    pub avg_query_time_ms: f64,
    pub avg_stream_time_ms: f64,
    pub avg_check_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
