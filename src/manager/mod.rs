//! The manager facade: two lanes, a scheduler, a throttle and a batcher.
//!
//! ```text
//! submit_job ──► Throttler ──► main WorkerPool ◄── BatchProcessor ◄── process_batch
//! submit_background_job ─────► background WorkerPool
//! schedule_job ──► TaskScheduler (PriorityQueue) ──tick──┘
//! ```
//!
//! A manager is an owned value. Construct it where the application starts,
//! share it by `Arc`, and call [`ConcurrentManager::shutdown`] when done.

mod metrics;
mod parallel;

pub use self::metrics::{ManagerMetrics, MetricsSink};

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::metrics::ManagerCounters;
use crate::config::ManagerConfig;
use crate::health::{HealthChecker, HealthReport};
use crate::scheduler::{
    BatchError, BatchProcessor, BoxedJob, JobError, JobResult, PoolError, PoolMetrics,
    TaskScheduler, ThrottleError, Throttler, WorkerPool,
};
use crate::shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};
use crate::telemetry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("rate limit exceeded")]
    RateLimited,

    #[error("manager is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Throttle(#[from] ThrottleError),

    #[error("timed out with {missing} keyed results outstanding")]
    KeyedTimeout { missing: usize },

    #[error(transparent)]
    Job(#[from] JobError),
}

/// State reachable from the manager's metrics loop.
struct Lanes<P> {
    main: Arc<WorkerPool<P>>,
    background: Arc<WorkerPool<P>>,
    scheduler: TaskScheduler<P>,
    counters: ManagerCounters,
    snapshot: RwLock<ManagerMetrics>,
    sink: RwLock<Option<Arc<dyn MetricsSink>>>,
}

impl<P: Send + 'static> Lanes<P> {
    fn collect(&self) -> ManagerMetrics {
        let metrics = ManagerMetrics::aggregate(
            &self.counters,
            self.main.metrics(),
            self.background.metrics(),
            self.scheduler.pending(),
        );
        *self.snapshot.write() = metrics.clone();
        metrics
    }

    fn publish(&self) {
        let metrics = self.collect();
        telemetry::record_queue_depth("manager", metrics.queue_depth);
        telemetry::record_worker_utilization("manager", metrics.worker_utilization);
        telemetry::record_scheduled_pending(metrics.scheduled_pending);
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.record_snapshot(&metrics);
        }
    }

    fn record_admission(&self, accepted: bool, started: Instant) {
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.record_job_admission(accepted, started.elapsed());
        }
    }
}

/// Facade over a throttled main lane and an unthrottled background lane.
pub struct ConcurrentManager<P = ()> {
    config: ManagerConfig,
    lanes: Arc<Lanes<P>>,
    throttler: Throttler,
    batch: BatchProcessor<P>,
    lifecycle: ShutdownCoordinator,
    health: HealthChecker,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Send + 'static> ConcurrentManager<P> {
    /// Build both lanes and start every background loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: ManagerConfig) -> Self {
        let config = config.normalized();
        let lifecycle = ShutdownCoordinator::new();
        let token = lifecycle.token();

        let main = Arc::new(WorkerPool::with_parent(config.main_pool(), &token));
        let background = Arc::new(WorkerPool::with_parent(config.background_pool(), &token));
        let scheduler = TaskScheduler::with_parent(background.clone(), config.scheduler(), &token);
        let throttler = Throttler::with_parent(config.throttle(), &token);
        let batch = BatchProcessor::new(main.clone(), config.batch());

        let counters = ManagerCounters::default();
        let initial = ManagerMetrics::aggregate(
            &counters,
            PoolMetrics::empty(main.worker_count(), main.queue_capacity()),
            PoolMetrics::empty(background.worker_count(), background.queue_capacity()),
            0,
        );
        let lanes = Arc::new(Lanes {
            main,
            background,
            scheduler,
            counters,
            snapshot: RwLock::new(initial),
            sink: RwLock::new(None),
        });

        let metrics_task = tokio::spawn(metrics_loop(
            lanes.clone(),
            config.manager_metrics_interval,
            token,
        ));

        info!(
            main_workers = lanes.main.worker_count(),
            background_workers = lanes.background.worker_count(),
            queue_capacity = config.queue_capacity,
            throttle_rate = config.throttle_rate,
            "concurrent manager started"
        );

        Self {
            config,
            lanes,
            throttler,
            batch,
            lifecycle,
            health: HealthChecker::default(),
            metrics_task: Mutex::new(Some(metrics_task)),
        }
    }

    /// Throttled, non-blocking submission to the main lane.
    pub fn submit_job(&self, job: BoxedJob<P>) -> Result<(), ManagerError> {
        let started = Instant::now();
        if !self.lifecycle.is_accepting() {
            return Err(ManagerError::ShuttingDown);
        }
        if !self.throttler.allow() {
            self.lanes.counters.add_rate_limited();
            self.lanes.record_admission(false, started);
            debug!(job_id = job.id(), "job rate limited");
            return Err(ManagerError::RateLimited);
        }
        let outcome = self.lanes.main.submit(job);
        if outcome.is_ok() {
            self.lanes.counters.add_submitted(1);
        }
        self.lanes.record_admission(outcome.is_ok(), started);
        outcome.map_err(Into::into)
    }

    /// Unthrottled, non-blocking submission to the background lane.
    pub fn submit_background_job(&self, job: BoxedJob<P>) -> Result<(), ManagerError> {
        if !self.lifecycle.is_accepting() {
            return Err(ManagerError::ShuttingDown);
        }
        self.lanes.background.submit(job)?;
        self.lanes.counters.add_submitted(1);
        Ok(())
    }

    /// Deferred, prioritized admission into the background lane.
    pub fn schedule_job(&self, job: BoxedJob<P>) -> Result<(), ManagerError> {
        if !self.lifecycle.is_accepting() {
            return Err(ManagerError::ShuttingDown);
        }
        self.lanes.scheduler.schedule(job);
        self.lanes.counters.add_submitted(1);
        Ok(())
    }

    /// Run `jobs` on the main lane and wait for all results in input order.
    pub async fn process_batch(
        &self,
        jobs: Vec<BoxedJob<P>>,
    ) -> Result<Vec<JobResult<P>>, ManagerError> {
        if !self.lifecycle.is_accepting() {
            return Err(ManagerError::ShuttingDown);
        }
        self.lanes.counters.add_submitted(jobs.len() as u64);
        Ok(self.batch.process_batch(jobs).await?)
    }

    /// Fresh snapshot of both lanes. Also replaces the periodic snapshot.
    pub fn get_metrics(&self) -> ManagerMetrics {
        self.lanes.collect()
    }

    /// The snapshot taken by the last metrics tick.
    pub fn snapshot(&self) -> ManagerMetrics {
        self.lanes.snapshot.read().clone()
    }

    /// Attach the monitoring collaborator that receives snapshots and
    /// admission events. Replaces any previous sink.
    pub fn set_metrics_sink(&self, sink: Arc<dyn MetricsSink>) {
        *self.lanes.sink.write() = Some(sink);
    }

    pub fn health(&self) -> HealthReport {
        let metrics = self.get_metrics();
        self.health.report(self.lifecycle.state(), &metrics)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn main_pool(&self) -> &Arc<WorkerPool<P>> {
        &self.lanes.main
    }

    pub fn background_pool(&self) -> &Arc<WorkerPool<P>> {
        &self.lanes.background
    }

    pub fn scheduler(&self) -> &TaskScheduler<P> {
        &self.lanes.scheduler
    }

    pub fn throttler(&self) -> &Throttler {
        &self.throttler
    }

    pub fn state(&self) -> ShutdownState {
        self.lifecycle.state()
    }

    pub fn is_accepting(&self) -> bool {
        self.lifecycle.is_accepting()
    }

    /// Token cancelled when the manager shuts down.
    pub fn token(&self) -> CancellationToken {
        self.lifecycle.token()
    }

    /// Stop admission, halt the scheduler and throttler, then drain both
    /// lanes, each bounded by the configured shutdown timeout.
    ///
    /// Idempotent; concurrent callers return once the first shutdown is done.
    pub async fn shutdown(&self) -> ShutdownResult {
        if !self.lifecycle.begin() {
            self.lifecycle.wait_stopped().await;
            return ShutdownResult::Complete;
        }
        info!("concurrent manager shutting down");

        self.lanes.scheduler.stop();
        self.throttler.stop();
        if let Some(task) = self.metrics_task.lock().take() {
            task.abort();
        }

        let timeout = self.config.shutdown_timeout;
        let (main, background) = tokio::join!(
            self.lanes.main.shutdown_timeout(timeout),
            self.lanes.background.shutdown_timeout(timeout),
        );
        let result = main.merge(background);

        let unscheduled = self.lanes.scheduler.pending();
        if unscheduled > 0 {
            warn!(unscheduled, "scheduled jobs never reached the background lane");
        }
        self.lanes.publish();
        self.lifecycle.finish();

        match &result {
            ShutdownResult::Complete => info!("concurrent manager stopped"),
            ShutdownResult::Timeout { remaining } => {
                warn!(remaining, "concurrent manager stopped with jobs aborted")
            }
        }
        result
    }
}

impl<P> Drop for ConcurrentManager<P> {
    fn drop(&mut self) {
        self.lifecycle.begin();
        if let Some(task) = self.metrics_task.lock().take() {
            task.abort();
        }
    }
}

async fn metrics_loop<P: Send + 'static>(
    lanes: Arc<Lanes<P>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => lanes.publish(),
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
