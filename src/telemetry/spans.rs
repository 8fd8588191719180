//! Span utilities and extension traits for job tracing.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for standardized job spans.
pub struct JobSpan;

impl JobSpan {
    /// Span for one job execution.
    ///
    /// `status`, `error.message` and `latency_ms` are filled in afterwards.
    pub fn new(job_id: &str, pool: &str, worker_id: usize) -> Span {
        info_span!(
            "job",
            job_id = %job_id,
            pool = %pool,
            worker_id = worker_id,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
