//! Aggregated manager metrics and the monitoring sink seam.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::PoolMetrics;

/// Snapshot combining both lanes with manager-level admission counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerMetrics {
    pub total_jobs_submitted: u64,
    pub total_jobs_completed: u64,
    pub total_jobs_failed: u64,
    pub jobs_rate_limited: u64,
    /// Execution-count-weighted mean over both lanes.
    pub average_response_time: Duration,
    pub peak_execution_time: Duration,
    pub queue_depth: usize,
    /// Active workers over total workers, both lanes.
    pub worker_utilization: f64,
    pub scheduled_pending: usize,
    pub main: PoolMetrics,
    pub background: PoolMetrics,
    pub last_update: DateTime<Utc>,
}

impl ManagerMetrics {
    pub(crate) fn aggregate(
        counters: &ManagerCounters,
        main: PoolMetrics,
        background: PoolMetrics,
        scheduled_pending: usize,
    ) -> Self {
        let workers = main.workers + background.workers;
        let active = main.active_workers as usize + background.active_workers as usize;
        let worker_utilization = if workers == 0 {
            0.0
        } else {
            active as f64 / workers as f64
        };

        Self {
            total_jobs_submitted: counters.submitted.load(Ordering::Relaxed),
            total_jobs_completed: main.completed_jobs + background.completed_jobs,
            total_jobs_failed: main.failed_jobs + background.failed_jobs,
            jobs_rate_limited: counters.rate_limited.load(Ordering::Relaxed),
            average_response_time: weighted_average(&main, &background),
            peak_execution_time: main.max_exec_time.max(background.max_exec_time),
            queue_depth: main.queue_size + background.queue_size,
            worker_utilization,
            scheduled_pending,
            main,
            background,
            last_update: Utc::now(),
        }
    }
}

fn weighted_average(a: &PoolMetrics, b: &PoolMetrics) -> Duration {
    let count = a.total_jobs + b.total_jobs;
    if count == 0 {
        return Duration::ZERO;
    }
    let total = a.average_exec_time.as_nanos() * a.total_jobs as u128
        + b.average_exec_time.as_nanos() * b.total_jobs as u128;
    let nanos = total / count as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Admission counters owned by the manager.
#[derive(Debug, Default)]
pub(crate) struct ManagerCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) rate_limited: AtomicU64,
}

impl ManagerCounters {
    pub(crate) fn add_submitted(&self, n: u64) {
        self.submitted.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }
}

/// External monitoring collaborator.
///
/// Implementations must be cheap; they are called inline from submission
/// paths and from the manager's metrics loop.
pub trait MetricsSink: Send + Sync {
    /// A `submit_job` admission attempt and how long it took.
    fn record_job_admission(&self, _accepted: bool, _elapsed: Duration) {}

    /// Periodic snapshot pushed by the metrics loop.
    fn record_snapshot(&self, metrics: &ManagerMetrics);
}
