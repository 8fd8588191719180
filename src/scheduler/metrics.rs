//! Pool counters and the periodic metrics snapshot.
//!
//! Counters are atomics updated by workers; the snapshot is derived from
//! them on a fixed interval and is never the source of truth.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one pool's activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub total_jobs: u64,
    pub submitted_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub rejected_jobs: u64,
    pub abandoned_results: u64,
    pub average_exec_time: Duration,
    pub max_exec_time: Duration,
    pub min_exec_time: Duration,
    pub total_exec_time: Duration,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub pending_results: usize,
    pub active_workers: u32,
    pub workers: usize,
    pub last_update: DateTime<Utc>,
}

impl PoolMetrics {
    pub fn empty(workers: usize, queue_capacity: usize) -> Self {
        Self {
            total_jobs: 0,
            submitted_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            rejected_jobs: 0,
            abandoned_results: 0,
            average_exec_time: Duration::ZERO,
            max_exec_time: Duration::ZERO,
            min_exec_time: Duration::ZERO,
            total_exec_time: Duration::ZERO,
            queue_size: 0,
            queue_capacity,
            pending_results: 0,
            active_workers: 0,
            workers,
            last_update: Utc::now(),
        }
    }

    /// Fraction of workers currently executing a job.
    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        self.active_workers as f64 / self.workers as f64
    }
}

/// Execution-time aggregates kept in atomics.
#[derive(Debug)]
struct ExecTimeStats {
    count: AtomicU64,
    total_nanos: AtomicU64,
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl ExecTimeStats {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            min_nanos: AtomicU64::new(u64::MAX),
            max_nanos: AtomicU64::new(0),
        }
    }

    fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.min_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }
}

/// Live counters shared by a pool's workers.
#[derive(Debug)]
pub struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    abandoned: AtomicU64,
    exec: ExecTimeStats,
}

impl PoolCounters {
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            exec: ExecTimeStats::new(),
        }
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, success: bool, elapsed: Duration) {
        self.exec.record(elapsed);
        if success {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Overlay the live monotonic counters onto a snapshot.
    pub fn overlay(&self, metrics: &mut PoolMetrics) {
        metrics.submitted_jobs = self.submitted.load(Ordering::Relaxed);
        metrics.completed_jobs = self.completed.load(Ordering::Relaxed);
        metrics.failed_jobs = self.failed.load(Ordering::Relaxed);
        metrics.rejected_jobs = self.rejected.load(Ordering::Relaxed);
        metrics.abandoned_results = self.abandoned.load(Ordering::Relaxed);
        metrics.total_jobs = metrics.completed_jobs + metrics.failed_jobs;
    }

    /// Recompute the derived timing gauges from one read of the counters.
    pub fn refresh(&self, metrics: &mut PoolMetrics) {
        self.overlay(metrics);

        let count = self.exec.count.load(Ordering::Relaxed);
        let total = self.exec.total_nanos.load(Ordering::Relaxed);
        metrics.total_exec_time = Duration::from_nanos(total);
        if count > 0 {
            metrics.average_exec_time = Duration::from_nanos(total / count);
            metrics.min_exec_time = Duration::from_nanos(self.exec.min_nanos.load(Ordering::Relaxed));
            metrics.max_exec_time = Duration::from_nanos(self.exec.max_nanos.load(Ordering::Relaxed));
        }
        metrics.last_update = Utc::now();
    }
}

impl Default for PoolCounters {
    fn default() -> Self {
        Self::new()
    }
}
