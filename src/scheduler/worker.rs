//! Worker loop: dequeue a job, execute it, publish its result.
//!
//! A panic inside `execute` is caught and reported in the result; the
//! worker keeps running.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::job::{panic_message, BoxedJob, JobError, JobResult};
use super::pool::{PoolShared, Publication};
use crate::telemetry::{self, JobSpan, SpanExt};

/// Spawn one worker. It exits when the pool is cancelled or its input closes.
pub(super) fn spawn_worker<P: Send + 'static>(
    shared: Arc<PoolShared<P>>,
    worker_id: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        worker_loop(&shared, worker_id).await;
    })
}

async fn worker_loop<P: Send + 'static>(shared: &PoolShared<P>, worker_id: usize) {
    let token = shared.lifecycle.token();
    loop {
        // Queued jobs are left for shutdown to drop once cancelled.
        if token.is_cancelled() {
            break;
        }
        let job = match shared.input.pop(&token, None).await {
            Ok(job) => job,
            Err(_) => break,
        };

        let _active = shared.lifecycle.enter();
        execute_job(shared, worker_id, job).await;
    }
    tracing::debug!(pool = %shared.name, worker_id, "worker exiting");
}

async fn execute_job<P: Send + 'static>(shared: &PoolShared<P>, worker_id: usize, job: BoxedJob<P>) {
    let job_id = job.id().to_string();
    let span = JobSpan::new(&job_id, &shared.name, worker_id);

    let start = Instant::now();
    let outcome = match AssertUnwindSafe(job.execute())
        .catch_unwind()
        .instrument(span.clone())
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
    };
    let duration = start.elapsed();
    drop(job);

    span.record("latency_ms", duration.as_millis() as u64);
    span.record_result(&outcome);
    record_outcome(shared, outcome.is_ok(), duration);

    let result = JobResult {
        job_id,
        outcome,
        duration,
        worker_id,
        completed_at: Utc::now(),
    };

    match shared.publish(result).await {
        Publication::Delivered => {}
        Publication::Discarded => {
            shared.counters.record_abandoned();
            telemetry::record_result_abandoned(&shared.name);
            tracing::debug!(parent: &span, "result discarded by consumer");
        }
        Publication::Abandoned => {
            shared.counters.record_abandoned();
            telemetry::record_result_abandoned(&shared.name);
            tracing::warn!(parent: &span, "result abandoned: pool cancelled with output full");
        }
    }
}

fn record_outcome<P>(shared: &PoolShared<P>, success: bool, duration: std::time::Duration) {
    shared.counters.record_outcome(success, duration);
    if success {
        telemetry::record_job_success(&shared.name, duration);
    } else {
        telemetry::record_job_failure(&shared.name, duration);
    }
}
