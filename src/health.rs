//! Health reporting for a running manager.
//!
//! Health is derived from the lifecycle state and the latest metrics
//! snapshot; nothing here probes the pools directly.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::manager::ManagerMetrics;
use crate::shutdown::ShutdownState;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_jobs: bool,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub worker_utilization: f64,
    pub scheduled_pending: usize,
    pub failure_ratio: f64,
    pub uptime_secs: u64,
}

/// Thresholds that turn a running manager into a degraded one.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Queued jobs over total capacity, both lanes.
    pub max_queue_ratio: f64,
    /// Failed over finished jobs.
    pub max_failure_ratio: f64,
    /// Ignore the failure ratio until this many jobs have finished.
    pub min_jobs_for_failure_ratio: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_queue_ratio: 0.9,
            max_failure_ratio: 0.5,
            min_jobs_for_failure_ratio: 20,
        }
    }
}

pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    /// Ready means accepting work with headroom in the lanes.
    pub fn is_ready(&self, state: ShutdownState, metrics: &ManagerMetrics) -> bool {
        state == ShutdownState::Running && queue_ratio(metrics) < self.config.max_queue_ratio
    }

    pub fn report(&self, state: ShutdownState, metrics: &ManagerMetrics) -> HealthReport {
        HealthReport {
            state: self.compute_state(state, metrics),
            ready: self.is_ready(state, metrics),
            accepting_jobs: state == ShutdownState::Running,
            queue_depth: metrics.queue_depth,
            queue_capacity: capacity(metrics),
            worker_utilization: metrics.worker_utilization,
            scheduled_pending: metrics.scheduled_pending,
            failure_ratio: failure_ratio(metrics),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(&self, state: ShutdownState, metrics: &ManagerMetrics) -> HealthState {
        if state != ShutdownState::Running {
            return HealthState::Unhealthy;
        }
        if queue_ratio(metrics) >= self.config.max_queue_ratio {
            return HealthState::Degraded;
        }
        let finished = metrics.total_jobs_completed + metrics.total_jobs_failed;
        if finished >= self.config.min_jobs_for_failure_ratio
            && failure_ratio(metrics) >= self.config.max_failure_ratio
        {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

fn capacity(metrics: &ManagerMetrics) -> usize {
    metrics.main.queue_capacity + metrics.background.queue_capacity
}

fn queue_ratio(metrics: &ManagerMetrics) -> f64 {
    match capacity(metrics) {
        0 => 0.0,
        cap => metrics.queue_depth as f64 / cap as f64,
    }
}

fn failure_ratio(metrics: &ManagerMetrics) -> f64 {
    let finished = metrics.total_jobs_completed + metrics.total_jobs_failed;
    if finished == 0 {
        0.0
    } else {
        metrics.total_jobs_failed as f64 / finished as f64
    }
}
