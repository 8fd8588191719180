//! Tests for the manager facade and its partitioned helpers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::health::HealthState;
use crate::scheduler::{levels, FnJob};

fn config() -> ManagerConfig {
    ManagerConfig {
        main_workers: 2,
        background_workers: 1,
        queue_capacity: 16,
        scheduler_interval: Duration::from_millis(10),
        manager_metrics_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn value_job(id: &str, value: u32) -> BoxedJob<u32> {
    FnJob::new(id, move || async move { Ok(value) }).boxed()
}

#[derive(Default)]
struct RecordingSink {
    snapshots: AtomicUsize,
    accepted: AtomicUsize,
    refused: AtomicUsize,
}

impl MetricsSink for RecordingSink {
    fn record_job_admission(&self, accepted: bool, _elapsed: Duration) {
        if accepted {
            self.accepted.fetch_add(1, Ordering::SeqCst);
        } else {
            self.refused.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record_snapshot(&self, _metrics: &ManagerMetrics) {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn submit_job_runs_on_main_lane() {
    let manager = ConcurrentManager::<u32>::new(config());
    manager.submit_job(value_job("a", 11)).unwrap();

    let result = manager
        .main_pool()
        .get_result_with_timeout(Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(result.outcome, Ok(11));
    assert_eq!(manager.get_metrics().total_jobs_submitted, 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn throttle_rejects_beyond_rate() {
    let manager = ConcurrentManager::<u32>::new(ManagerConfig {
        throttle_rate: 3,
        throttle_interval: Duration::from_secs(60),
        ..config()
    });

    for i in 0..3 {
        manager.submit_job(value_job(&format!("t{i}"), i)).unwrap();
    }
    let err = manager.submit_job(value_job("t3", 3)).unwrap_err();
    assert_eq!(err, ManagerError::RateLimited);

    let metrics = manager.get_metrics();
    assert_eq!(metrics.jobs_rate_limited, 1);
    assert_eq!(metrics.total_jobs_submitted, 3);
    manager.shutdown().await;
}

#[tokio::test]
async fn background_lane_bypasses_throttle() {
    let manager = ConcurrentManager::<u32>::new(ManagerConfig {
        throttle_rate: 1,
        throttle_interval: Duration::from_secs(60),
        ..config()
    });
    manager.submit_job(value_job("main", 0)).unwrap();
    for i in 0..4 {
        manager
            .submit_background_job(value_job(&format!("bg{i}"), i))
            .unwrap();
    }
    assert_eq!(manager.background_pool().metrics().submitted_jobs, 4);
    manager.shutdown().await;
}

#[tokio::test]
async fn background_capacity_is_half_of_main() {
    let manager = ConcurrentManager::<u32>::new(config());
    assert_eq!(manager.main_pool().queue_capacity(), 16);
    assert_eq!(manager.background_pool().queue_capacity(), 8);
    manager.shutdown().await;
}

#[tokio::test]
async fn scheduled_jobs_reach_background_in_priority_order() {
    let manager = ConcurrentManager::<u32>::new(config());
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for (id, priority) in [("low", levels::LOW), ("high", levels::HIGH), ("mid", levels::NORMAL)] {
        let order = order.clone();
        let job = FnJob::new(id, move || {
            let order = order.clone();
            async move {
                order.lock().push(id);
                Ok(0)
            }
        })
        .with_priority(priority)
        .boxed();
        manager.schedule_job(job).unwrap();
    }

    tokio::time::timeout(Duration::from_secs(2), async {
        while order.lock().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("scheduled jobs did not run");

    assert_eq!(*order.lock(), vec!["high", "mid", "low"]);
    assert_eq!(manager.scheduler().stats().dispatched, 3);
    manager.shutdown().await;
}

#[tokio::test]
async fn process_batch_counts_and_orders() {
    let manager = ConcurrentManager::<u32>::new(config());
    let jobs = (0..5).map(|i| value_job(&format!("b{i}"), i * 10)).collect();

    let results = manager.process_batch(jobs).await.unwrap();
    let values: Vec<_> = results.iter().map(|r| *r.payload().unwrap()).collect();
    assert_eq!(values, vec![0, 10, 20, 30, 40]);
    assert_eq!(manager.get_metrics().total_jobs_submitted, 5);
    manager.shutdown().await;
}

#[tokio::test]
async fn map_in_chunks_preserves_order() {
    let manager = ConcurrentManager::<()>::new(config());
    let items: Vec<u64> = (1..=23).collect();

    let squares = manager
        .map_in_chunks(items, 5, |n| Ok(n * n))
        .await
        .unwrap();
    assert_eq!(squares.len(), 23);
    assert_eq!(squares[0], 1);
    assert_eq!(squares[22], 529);
    // 23 items in chunks of 5.
    assert_eq!(manager.get_metrics().total_jobs_submitted, 5);
    manager.shutdown().await;
}

#[tokio::test]
async fn map_in_chunks_reports_failing_item() {
    let manager = ConcurrentManager::<()>::new(config());
    let err = manager
        .map_in_chunks((0..12).collect::<Vec<u32>>(), 4, |n| {
            if n == 6 {
                Err(JobError::failed("bad input"))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ManagerError::Job(JobError::ItemFailed {
            index: 6,
            message: "bad input".into()
        })
    );
    manager.shutdown().await;
}

#[tokio::test]
async fn map_in_chunks_zero_size_uses_batch_size() {
    let manager = ConcurrentManager::<()>::new(ManagerConfig {
        batch_size: 4,
        ..config()
    });
    let out = manager
        .map_in_chunks(vec!["a", "bb", "ccc", "dddd", "e"], 0, |s| Ok(s.len()))
        .await
        .unwrap();
    assert_eq!(out, vec![1, 2, 3, 4, 1]);
    assert_eq!(manager.get_metrics().total_jobs_submitted, 2);
    manager.shutdown().await;
}

#[tokio::test]
async fn process_keyed_collects_one_value_per_key() {
    let manager = ConcurrentManager::<()>::new(config());
    let items = vec![("eur".to_string(), 2u32), ("usd".to_string(), 3), ("gbp".to_string(), 4)];

    let out = manager
        .process_keyed(
            items,
            |n| async move { Ok(n * 100) },
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(out["usd"], 300);
    assert_eq!(out["gbp"], 400);
    manager.shutdown().await;
}

#[tokio::test]
async fn process_keyed_times_out_on_slow_key() {
    let manager = ConcurrentManager::<()>::new(config());
    let items = vec![(1u8, 1u64), (2, 400)];

    let err = manager
        .process_keyed(
            items,
            |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ms)
            },
            Duration::from_millis(80),
        )
        .await
        .unwrap_err();
    assert_eq!(err, ManagerError::KeyedTimeout { missing: 1 });

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(manager.main_pool().get_result().is_none());
    manager.shutdown().await;
}

#[tokio::test]
async fn process_keyed_stops_at_rate_limit() {
    let manager = ConcurrentManager::<()>::new(ManagerConfig {
        throttle_rate: 2,
        throttle_interval: Duration::from_secs(60),
        ..config()
    });
    let items = (0..4u32).map(|i| (i, i)).collect();
    let err = manager
        .process_keyed(items, |n| async move { Ok(n) }, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err, ManagerError::RateLimited);
    manager.shutdown().await;
}

#[tokio::test]
async fn dispatch_events_returns_first_handler_error() {
    let manager = ConcurrentManager::<()>::new(config());
    let handled = Arc::new(AtomicUsize::new(0));

    let counter = handled.clone();
    manager
        .dispatch_events(vec!["a", "b", "c"], move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
    assert_eq!(handled.load(Ordering::SeqCst), 3);

    let err = manager
        .dispatch_events(vec![1, 2, 3], |n| async move {
            if n >= 2 {
                Err(JobError::failed(format!("event {n}")))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap_err();
    assert_eq!(err, ManagerError::Job(JobError::failed("event 2")));
    manager.shutdown().await;
}

#[tokio::test]
async fn sink_receives_admissions_and_snapshots() {
    let manager = ConcurrentManager::<u32>::new(ManagerConfig {
        throttle_rate: 1,
        throttle_interval: Duration::from_secs(60),
        ..config()
    });
    let sink = Arc::new(RecordingSink::default());
    manager.set_metrics_sink(sink.clone());

    manager.submit_job(value_job("ok", 1)).unwrap();
    let _ = manager.submit_job(value_job("limited", 2));
    assert_eq!(sink.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(sink.refused.load(Ordering::SeqCst), 1);

    tokio::time::timeout(Duration::from_secs(2), async {
        while sink.snapshots.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no snapshot pushed");
    manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent_and_closes_admission() {
    let manager = ConcurrentManager::<u32>::new(config());
    manager.submit_job(value_job("a", 1)).unwrap();

    assert_eq!(manager.shutdown().await, ShutdownResult::Complete);
    assert_eq!(manager.shutdown().await, ShutdownResult::Complete);
    assert_eq!(manager.state(), ShutdownState::Stopped);

    assert_eq!(
        manager.submit_job(value_job("b", 2)).unwrap_err(),
        ManagerError::ShuttingDown
    );
    assert_eq!(
        manager.submit_background_job(value_job("c", 3)).unwrap_err(),
        ManagerError::ShuttingDown
    );
    assert_eq!(
        manager.schedule_job(value_job("d", 4)).unwrap_err(),
        ManagerError::ShuttingDown
    );
    assert!(manager.scheduler().is_stopped());
    assert!(manager.throttler().is_stopped());
}

#[tokio::test]
async fn shutdown_times_out_on_stuck_job() {
    let manager = ConcurrentManager::<u32>::new(ManagerConfig {
        shutdown_timeout: Duration::from_secs(1),
        ..config()
    });
    manager
        .submit_job(
            FnJob::new("stuck", || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(0)
            })
            .boxed(),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = manager.shutdown().await;
    assert_eq!(result, ShutdownResult::Timeout { remaining: 1 });
}

#[tokio::test]
async fn health_follows_lifecycle() {
    let manager = ConcurrentManager::<u32>::new(config());
    let report = manager.health();
    assert_eq!(report.state, HealthState::Healthy);
    assert!(report.ready);

    manager.shutdown().await;
    let report = manager.health();
    assert_eq!(report.state, HealthState::Unhealthy);
    assert!(!report.accepting_jobs);
}
