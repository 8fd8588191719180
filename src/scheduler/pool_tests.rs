//! Tests for the worker pool and its worker loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use super::*;
use crate::scheduler::job::{FnJob, JobError};

fn pool(workers: usize, capacity: usize) -> WorkerPool<u32> {
    WorkerPool::new(PoolConfig::new("test", workers, capacity))
}

fn value_job(id: &str, value: u32) -> BoxedJob<u32> {
    FnJob::new(id, move || async move { Ok(value) }).boxed()
}

fn sleep_job(id: &str, d: Duration, value: u32) -> BoxedJob<u32> {
    FnJob::new(id, move || async move {
        tokio::time::sleep(d).await;
        Ok(value)
    })
    .boxed()
}

/// Job that blocks until the gate gets a permit.
fn gated_job(id: &str, gate: Arc<Semaphore>) -> BoxedJob<u32> {
    FnJob::new(id, move || {
        let gate = gate.clone();
        async move {
            let permit = gate.acquire().await.map_err(|e| JobError::from_error(&e))?;
            permit.forget();
            Ok(0)
        }
    })
    .boxed()
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn executes_job_and_publishes_result() {
    let pool = pool(2, 8);
    pool.submit(value_job("a", 7)).unwrap();

    let result = pool.get_result_with_timeout(Duration::from_secs(1)).await.unwrap();
    assert_eq!(result.job_id, "a");
    assert_eq!(result.outcome, Ok(7));
    pool.shutdown().await;
}

#[tokio::test]
async fn submit_beyond_capacity_is_queue_full() {
    let pool = pool(1, 3);
    let gate = Arc::new(Semaphore::new(0));

    pool.submit(gated_job("gate", gate.clone())).unwrap();
    wait_until(|| pool.queue_len() == 0).await;

    for i in 0..3 {
        pool.submit(value_job(&format!("job-{i}"), i)).unwrap();
    }
    let err = pool.submit(value_job("overflow", 99)).unwrap_err();
    assert_eq!(err, PoolError::QueueFull);
    assert_eq!(pool.metrics().rejected_jobs, 1);

    gate.add_permits(1);
    pool.shutdown().await;
}

#[tokio::test]
async fn single_worker_serializes_jobs() {
    let d = Duration::from_millis(100);
    let pool = pool(1, 10);

    let start = std::time::Instant::now();
    for i in 0..5 {
        pool.submit(sleep_job(&format!("job-{i}"), d, i)).unwrap();
    }

    let mut ids = Vec::new();
    for _ in 0..5 {
        let r = pool.get_result_with_timeout(Duration::from_secs(2)).await.unwrap();
        assert!(r.is_success());
        ids.push(r.job_id);
    }
    let elapsed = start.elapsed();

    assert_eq!(ids, vec!["job-0", "job-1", "job-2", "job-3", "job-4"]);
    assert!(elapsed >= d * 5, "finished too fast: {elapsed:?}");
    assert!(elapsed < d * 6, "not serialized tightly: {elapsed:?}");
    pool.shutdown().await;
}

#[tokio::test]
async fn job_failure_is_contained_in_result() {
    let pool = pool(1, 4);
    pool.submit(FnJob::new("bad", || async { Err::<u32, _>(JobError::failed("nope")) }).boxed())
        .unwrap();
    pool.submit(value_job("good", 1)).unwrap();

    let first = pool.get_result_with_timeout(Duration::from_secs(1)).await.unwrap();
    let second = pool.get_result_with_timeout(Duration::from_secs(1)).await.unwrap();
    assert_eq!(first.error(), Some(&JobError::failed("nope")));
    assert!(second.is_success());
    pool.shutdown().await;
}

#[tokio::test]
async fn panicking_job_does_not_kill_worker() {
    let pool = pool(1, 4);
    pool.submit(
        FnJob::new("boom", || async {
            let empty: Vec<u32> = Vec::new();
            Ok::<u32, JobError>(empty[0])
        })
        .boxed(),
    )
    .unwrap();
    pool.submit(value_job("after", 3)).unwrap();

    let first = pool.get_result_with_timeout(Duration::from_secs(1)).await.unwrap();
    match first.error() {
        Some(JobError::Panicked(msg)) => assert!(msg.contains("index out of bounds")),
        other => panic!("expected panic result, got {other:?}"),
    }
    let second = pool.get_result_with_timeout(Duration::from_secs(1)).await.unwrap();
    assert_eq!(second.outcome, Ok(3));
    pool.shutdown().await;
}

#[tokio::test]
async fn duplicate_in_flight_id_is_rejected() {
    let pool = pool(1, 4);
    let gate = Arc::new(Semaphore::new(0));
    pool.submit(gated_job("same", gate.clone())).unwrap();

    let err = pool.submit(value_job("same", 1)).unwrap_err();
    assert_eq!(err, PoolError::DuplicateJob("same".into()));

    gate.add_permits(1);
    pool.get_result_with_timeout(Duration::from_secs(1)).await.unwrap();

    // Once the result is out the id is free again.
    pool.submit(value_job("same", 2)).unwrap();
    let r = pool.get_result_with_timeout(Duration::from_secs(1)).await.unwrap();
    assert_eq!(r.outcome, Ok(2));
    pool.shutdown().await;
}

#[tokio::test]
async fn try_submit_hands_job_back() {
    let pool = pool(1, 1);
    let gate = Arc::new(Semaphore::new(0));
    pool.submit(gated_job("gate", gate.clone())).unwrap();
    wait_until(|| pool.queue_len() == 0).await;
    pool.submit(value_job("fill", 0)).unwrap();

    let rejected = pool.try_submit(value_job("back", 5)).unwrap_err();
    assert_eq!(rejected.error, PoolError::QueueFull);
    assert_eq!(rejected.job.id(), "back");
    let shown = format!("{rejected:?}");
    assert!(shown.contains("QueueFull") && shown.contains("back"), "{shown}");

    gate.add_permits(1);
    pool.shutdown().await;
}

#[tokio::test]
async fn submit_with_timeout_expires_when_full() {
    let pool = pool(1, 1);
    let gate = Arc::new(Semaphore::new(0));
    pool.submit(gated_job("gate", gate.clone())).unwrap();
    wait_until(|| pool.queue_len() == 0).await;
    pool.submit(value_job("fill", 0)).unwrap();

    let d = Duration::from_millis(30);
    let err = pool.submit_with_timeout(value_job("late", 1), d).await.unwrap_err();
    assert_eq!(err, PoolError::SubmissionTimeout(d));

    gate.add_permits(1);
    pool.shutdown().await;
}

#[tokio::test]
async fn submit_with_timeout_succeeds_once_space_frees() {
    let pool = pool(1, 1);
    let gate = Arc::new(Semaphore::new(0));
    pool.submit(gated_job("gate", gate.clone())).unwrap();
    wait_until(|| pool.queue_len() == 0).await;
    pool.submit(value_job("fill", 0)).unwrap();

    let releaser = {
        let gate = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.add_permits(1);
        })
    };
    pool.submit_with_timeout(value_job("late", 1), Duration::from_secs(1))
        .await
        .unwrap();
    releaser.await.unwrap();
    pool.shutdown().await;
}

#[tokio::test]
async fn get_result_timeout_and_empty_poll() {
    let pool = pool(1, 2);
    assert!(pool.get_result().is_none());

    let d = Duration::from_millis(20);
    let err = pool.get_result_with_timeout(d).await.unwrap_err();
    assert_eq!(err, PoolError::ResultTimeout(d));
    pool.shutdown().await;
}

#[tokio::test]
async fn matching_consumer_leaves_other_results() {
    let pool = pool(2, 8);
    pool.submit(value_job("mine", 1)).unwrap();
    pool.submit(value_job("theirs", 2)).unwrap();
    wait_until(|| pool.pending_results() == 2).await;

    let mine = pool
        .get_result_matching(|r| r.job_id == "mine", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(mine.outcome, Ok(1));

    let theirs = pool.get_result().unwrap();
    assert_eq!(theirs.job_id, "theirs");
    pool.shutdown().await;
}

#[tokio::test]
async fn discarded_results_never_surface() {
    let pool = pool(2, 8);
    let gate = Arc::new(Semaphore::new(0));

    pool.submit(value_job("done", 1)).unwrap();
    wait_until(|| pool.pending_results() == 1).await;
    pool.submit(gated_job("running", gate.clone())).unwrap();
    wait_until(|| pool.metrics().active_workers == 1).await;

    let removed = pool.discard_results(["done", "running"]);
    assert_eq!(removed, 1);

    gate.add_permits(1);
    wait_until(|| pool.metrics().abandoned_results == 2).await;
    assert!(pool.get_result().is_none());
    assert_eq!(pool.metrics().completed_jobs, 2);
    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent_and_refuses_new_work() {
    let pool = Arc::new(pool(2, 4));
    pool.submit(value_job("a", 1)).unwrap();

    let first = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.shutdown().await })
    };
    let second = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.shutdown().await })
    };
    first.await.unwrap();
    second.await.unwrap();
    pool.shutdown().await;

    assert_eq!(pool.state(), ShutdownState::Stopped);
    assert_eq!(pool.submit(value_job("b", 2)).unwrap_err(), PoolError::ShuttingDown);
}

#[tokio::test]
async fn shutdown_waits_for_running_job() {
    let pool = pool(1, 4);
    pool.submit(sleep_job("slow", Duration::from_millis(40), 9)).unwrap();
    wait_until(|| pool.metrics().active_workers == 1).await;

    pool.shutdown().await;

    // The running job finished and its result is still readable.
    let r = pool.get_result().unwrap();
    assert_eq!(r.outcome, Ok(9));
}

#[tokio::test]
async fn shutdown_drops_queued_jobs() {
    let pool = pool(1, 4);
    let gate = Arc::new(Semaphore::new(0));
    pool.submit(gated_job("gate", gate.clone())).unwrap();
    wait_until(|| pool.queue_len() == 0).await;
    pool.submit(value_job("queued-1", 1)).unwrap();
    pool.submit(value_job("queued-2", 2)).unwrap();

    let releaser = {
        let gate = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.add_permits(1);
        })
    };
    pool.shutdown().await;
    releaser.await.unwrap();

    assert_eq!(pool.queue_len(), 0);
    assert_eq!(pool.metrics().completed_jobs, 1);
    assert_eq!(pool.get_result().map(|r| r.job_id), Some("gate".to_string()));
    assert!(pool.get_result().is_none());
}

#[tokio::test]
async fn shutdown_timeout_aborts_stuck_workers() {
    let pool = pool(1, 4);
    let gate = Arc::new(Semaphore::new(0));
    pool.submit(gated_job("stuck", gate)).unwrap();
    wait_until(|| pool.metrics().active_workers == 1).await;

    let result = pool.shutdown_timeout(Duration::from_millis(30)).await;
    assert_eq!(result, ShutdownResult::Timeout { remaining: 1 });
    assert_eq!(pool.state(), ShutdownState::Stopped);
    assert_eq!(pool.metrics().active_workers, 0);
}

#[tokio::test]
async fn parent_cancellation_stops_admission() {
    let parent = CancellationToken::new();
    let pool: WorkerPool<u32> = WorkerPool::with_parent(PoolConfig::new("child", 1, 2), &parent);
    parent.cancel();

    assert!(!pool.is_accepting());
    assert_eq!(pool.submit(value_job("x", 1)).unwrap_err(), PoolError::ShuttingDown);
    pool.shutdown().await;
}

#[tokio::test]
async fn metrics_track_outcomes() {
    let pool = WorkerPool::new(PoolConfig {
        metrics_interval: Duration::from_millis(10),
        ..PoolConfig::new("metered", 2, 8)
    });
    pool.submit(sleep_job("a", Duration::from_millis(5), 1)).unwrap();
    pool.submit(FnJob::new("b", || async { Err::<u32, _>(JobError::failed("x")) }).boxed())
        .unwrap();
    for _ in 0..2 {
        pool.get_result_with_timeout(Duration::from_secs(1)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(30)).await;

    let m = pool.metrics();
    assert_eq!(m.submitted_jobs, 2);
    assert_eq!(m.completed_jobs, 1);
    assert_eq!(m.failed_jobs, 1);
    assert_eq!(m.total_jobs, 2);
    assert_eq!(m.workers, 2);
    assert!(m.max_exec_time >= Duration::from_millis(5));
    pool.shutdown().await;
}

#[tokio::test]
async fn zero_workers_resolves_to_cpu_count() {
    let pool = pool(0, 2);
    assert_eq!(pool.worker_count(), num_cpus::get().max(1));
    pool.shutdown().await;
}
