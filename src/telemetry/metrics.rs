//! Metrics facade emission.
//!
//! Values go through the `metrics` crate; with no recorder installed every
//! call is a no-op. Snapshots for programmatic consumers live on the pools
//! and the manager.

use std::time::Duration;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    describe_counter!(
        "worklane_jobs_submitted_total",
        "Jobs accepted into a pool input queue"
    );
    describe_counter!(
        "worklane_jobs_completed_total",
        "Jobs whose execute returned success"
    );
    describe_counter!(
        "worklane_jobs_failed_total",
        "Jobs whose execute returned an error or panicked"
    );
    describe_counter!(
        "worklane_jobs_rejected_total",
        "Submissions refused by a pool"
    );
    describe_counter!(
        "worklane_results_abandoned_total",
        "Results dropped because the pool was cancelled or the consumer gave up"
    );
    describe_counter!(
        "worklane_throttled_total",
        "Admissions denied by the token bucket"
    );
    describe_histogram!(
        "worklane_job_duration_seconds",
        Unit::Seconds,
        "Job execute duration"
    );
    describe_histogram!(
        "worklane_batch_duration_seconds",
        Unit::Seconds,
        "Wall time of a batch call"
    );
    describe_gauge!("worklane_queue_depth", "Jobs waiting in a pool input queue");
    describe_gauge!(
        "worklane_worker_utilization",
        "Active workers divided by total workers"
    );
    describe_gauge!(
        "worklane_scheduled_pending",
        "Jobs waiting in the scheduler priority queue"
    );
}

pub fn record_job_submitted(pool: &str) {
    counter!("worklane_jobs_submitted_total", "pool" => pool.to_string()).increment(1);
}

pub fn record_job_success(pool: &str, elapsed: Duration) {
    counter!("worklane_jobs_completed_total", "pool" => pool.to_string()).increment(1);
    histogram!("worklane_job_duration_seconds", "pool" => pool.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_job_failure(pool: &str, elapsed: Duration) {
    counter!("worklane_jobs_failed_total", "pool" => pool.to_string()).increment(1);
    histogram!("worklane_job_duration_seconds", "pool" => pool.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_rejection(pool: &str, reason: &'static str) {
    counter!(
        "worklane_jobs_rejected_total",
        "pool" => pool.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_result_abandoned(pool: &str) {
    counter!("worklane_results_abandoned_total", "pool" => pool.to_string()).increment(1);
}

pub fn record_throttled() {
    counter!("worklane_throttled_total").increment(1);
}

pub fn record_queue_depth(pool: &str, depth: usize) {
    gauge!("worklane_queue_depth", "pool" => pool.to_string()).set(depth as f64);
}

pub fn record_worker_utilization(pool: &str, ratio: f64) {
    gauge!("worklane_worker_utilization", "pool" => pool.to_string()).set(ratio);
}

pub fn record_scheduled_pending(pending: usize) {
    gauge!("worklane_scheduled_pending").set(pending as f64);
}

pub fn record_batch(outcome: &'static str, elapsed: Duration) {
    histogram!("worklane_batch_duration_seconds", "outcome" => outcome)
        .record(elapsed.as_secs_f64());
}
