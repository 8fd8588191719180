//! Telemetry for worklane.
//!
//! Structured logging, job spans, and metrics facade emission.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    init_metrics, record_batch, record_job_failure, record_job_submitted, record_job_success,
    record_queue_depth, record_rejection, record_result_abandoned, record_scheduled_pending,
    record_throttled, record_worker_utilization,
};
pub use spans::{JobSpan, SpanExt};
