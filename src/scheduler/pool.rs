//! Bounded worker pool.
//!
//! A fixed set of workers drains a bounded input queue and publishes one
//! [`JobResult`] per executed job into a bounded output queue. The pool owns
//! its lifecycle: shutdown stops admission, cancels, joins the workers and
//! only then closes the output path.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::{BoxedJob, JobResult};
use super::metrics::{PoolCounters, PoolMetrics};
use super::queue::{BoundedQueue, PopError, PushError};
use super::worker;
use crate::shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};
use crate::telemetry;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Label used in logs and metrics.
    pub name: String,
    /// Worker count. 0 means one per CPU.
    pub workers: usize,
    /// Capacity of both the input and the output queue.
    pub queue_capacity: usize,
    pub metrics_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            workers: 0,
            queue_capacity: 100,
            metrics_interval: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    pub fn new(name: impl Into<String>, workers: usize, queue_capacity: usize) -> Self {
        Self {
            name: name.into(),
            workers,
            queue_capacity,
            ..Default::default()
        }
    }

    fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

/// Structural failures of pool operations. Job failures travel inside results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("queue is full")]
    QueueFull,

    #[error("submission timed out after {0:?}")]
    SubmissionTimeout(Duration),

    #[error("no result within {0:?}")]
    ResultTimeout(Duration),

    #[error("pool is shutting down")]
    ShuttingDown,

    #[error("job {0} is already in flight")]
    DuplicateJob(String),
}

/// A refused submission, carrying the job back to the caller.
pub struct Rejected<P> {
    pub error: PoolError,
    pub job: BoxedJob<P>,
}

impl<P: Send + 'static> std::fmt::Debug for Rejected<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .field("job_id", &self.job.id())
            .finish()
    }
}

impl<P> Rejected<P> {
    pub fn into_error(self) -> PoolError {
        self.error
    }
}

/// State shared between the pool handle, its workers and its metrics loop.
pub(super) struct PoolShared<P> {
    pub(super) name: String,
    pub(super) input: BoundedQueue<BoxedJob<P>>,
    pub(super) output: BoundedQueue<JobResult<P>>,
    pub(super) lifecycle: ShutdownCoordinator,
    pub(super) counters: PoolCounters,
    /// Ids accepted into the input queue whose result is not yet published.
    in_flight: DashMap<String, ()>,
    /// Ids whose result must be dropped when produced. The lock also
    /// serializes publication against `discard_results`.
    discarded: Mutex<HashSet<String>>,
    snapshot: RwLock<PoolMetrics>,
    workers: usize,
}

/// How a worker's result left the pool.
pub(super) enum Publication {
    Delivered,
    Discarded,
    Abandoned,
}

impl<P: Send + 'static> PoolShared<P> {
    /// Publish a result unless it was discarded. Waits for output space until
    /// the pool is cancelled, at which point the result is abandoned.
    pub(super) async fn publish(&self, mut result: JobResult<P>) -> Publication {
        let token = self.lifecycle.token();
        loop {
            {
                let mut discarded = self.discarded.lock();
                if discarded.remove(&result.job_id) {
                    self.in_flight.remove(&result.job_id);
                    return Publication::Discarded;
                }
                // Released before the push so a consumer that sees the result
                // can resubmit the same id.
                self.in_flight.remove(&result.job_id);
                match self.output.try_push(result) {
                    Ok(()) => return Publication::Delivered,
                    Err(PushError::Full(back)) => {
                        self.in_flight.insert(back.job_id.clone(), ());
                        result = back;
                    }
                    Err(_) => return Publication::Abandoned,
                }
            }

            if self.output.wait_for_space(&token, None).await.is_err() {
                self.in_flight.remove(&result.job_id);
                return Publication::Abandoned;
            }
        }
    }

    pub(super) fn release_id(&self, job_id: &str) {
        self.in_flight.remove(job_id);
        self.discarded.lock().remove(job_id);
    }

    fn refresh_snapshot(&self) {
        let mut snapshot = self.snapshot.write();
        self.counters.refresh(&mut snapshot);
        self.overlay_live(&mut snapshot);
        telemetry::record_queue_depth(&self.name, snapshot.queue_size);
        telemetry::record_worker_utilization(&self.name, snapshot.utilization());
    }

    fn overlay_live(&self, metrics: &mut PoolMetrics) {
        metrics.queue_size = self.input.len();
        metrics.pending_results = self.output.len();
        metrics.active_workers = self.lifecycle.in_flight_count();
        metrics.workers = self.workers;
    }
}

/// Fixed-size pool of async workers over bounded queues.
pub struct WorkerPool<P> {
    shared: Arc<PoolShared<P>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
    queue_capacity: usize,
}

impl<P: Send + 'static> WorkerPool<P> {
    /// Start the workers and the metrics loop. Must be called inside a tokio runtime.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_parent(config, &CancellationToken::new())
    }

    /// Like [`new`](Self::new); the pool is cancelled when `parent` is.
    pub fn with_parent(config: PoolConfig, parent: &CancellationToken) -> Self {
        let workers = config.resolved_workers();
        let queue_capacity = config.queue_capacity.max(1);
        let shared = Arc::new(PoolShared {
            name: config.name.clone(),
            input: BoundedQueue::new(queue_capacity),
            output: BoundedQueue::new(queue_capacity),
            lifecycle: ShutdownCoordinator::with_parent(parent),
            counters: PoolCounters::new(),
            in_flight: DashMap::new(),
            discarded: Mutex::new(HashSet::new()),
            snapshot: RwLock::new(PoolMetrics::empty(workers, queue_capacity)),
            workers,
        });

        let handles = (0..workers)
            .map(|worker_id| worker::spawn_worker(shared.clone(), worker_id))
            .collect();
        let metrics_task = tokio::spawn(metrics_loop(
            shared.clone(),
            config.metrics_interval.max(Duration::from_millis(10)),
        ));

        info!(pool = %config.name, workers, queue_capacity, "worker pool started");

        Self {
            shared,
            workers: Mutex::new(handles),
            metrics_task: Mutex::new(Some(metrics_task)),
            queue_capacity,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn state(&self) -> ShutdownState {
        self.shared.lifecycle.state()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.lifecycle.is_accepting()
    }

    /// Jobs waiting for a worker.
    pub fn queue_len(&self) -> usize {
        self.shared.input.len()
    }

    /// Results waiting for a consumer.
    pub fn pending_results(&self) -> usize {
        self.shared.output.len()
    }

    /// Enqueue without waiting, handing the job back on refusal.
    pub fn try_submit(&self, job: BoxedJob<P>) -> Result<(), Rejected<P>> {
        let job = self.admit(job)?;
        match self.shared.input.try_push(job) {
            Ok(()) => {
                self.accepted();
                Ok(())
            }
            Err(PushError::Full(job)) => Err(self.refuse(job, PoolError::QueueFull)),
            Err(err) => Err(self.refuse(err.into_inner(), PoolError::ShuttingDown)),
        }
    }

    /// Enqueue without waiting.
    pub fn submit(&self, job: BoxedJob<P>) -> Result<(), PoolError> {
        self.try_submit(job).map_err(Rejected::into_error)
    }

    /// Enqueue, waiting up to `timeout` for space.
    pub async fn submit_with_timeout(
        &self,
        job: BoxedJob<P>,
        timeout: Duration,
    ) -> Result<(), PoolError> {
        let job = self.admit(job).map_err(Rejected::into_error)?;
        let token = self.shared.lifecycle.token();
        let deadline = Instant::now() + timeout;
        match self.shared.input.push(job, &token, Some(deadline)).await {
            Ok(()) => {
                self.accepted();
                Ok(())
            }
            Err(PushError::Timeout(job)) => {
                Err(self.refuse(job, PoolError::SubmissionTimeout(timeout)).error)
            }
            Err(PushError::Full(job)) => Err(self.refuse(job, PoolError::QueueFull).error),
            Err(err) => Err(self.refuse(err.into_inner(), PoolError::ShuttingDown).error),
        }
    }

    /// Take the oldest result without waiting.
    pub fn get_result(&self) -> Option<JobResult<P>> {
        self.shared.output.try_pop()
    }

    /// Wait up to `timeout` for the next result.
    pub async fn get_result_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<JobResult<P>, PoolError> {
        let token = self.shared.lifecycle.token();
        let deadline = Instant::now() + timeout;
        self.shared
            .output
            .pop(&token, Some(deadline))
            .await
            .map_err(|e| result_error(e, timeout))
    }

    /// Wait up to `timeout` for a result accepted by `pred`. Other results
    /// stay queued for other consumers.
    pub async fn get_result_matching<F>(
        &self,
        pred: F,
        timeout: Duration,
    ) -> Result<JobResult<P>, PoolError>
    where
        F: FnMut(&JobResult<P>) -> bool,
    {
        let token = self.shared.lifecycle.token();
        let deadline = Instant::now() + timeout;
        self.shared
            .output
            .take_first_wait(pred, &token, Some(deadline))
            .await
            .map_err(|e| result_error(e, timeout))
    }

    /// Drop the results of these jobs, whether already queued or still running.
    /// Returns how many queued results were removed immediately.
    pub fn discard_results<I, S>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: HashSet<String> = ids.into_iter().map(|s| s.as_ref().to_string()).collect();
        if ids.is_empty() {
            return 0;
        }

        let mut discarded = self.shared.discarded.lock();
        let mut removed_ids = HashSet::new();
        let removed = self.shared.output.remove_where(|r| {
            if ids.contains(&r.job_id) {
                removed_ids.insert(r.job_id.clone());
                true
            } else {
                false
            }
        });
        for id in ids.difference(&removed_ids) {
            if self.shared.in_flight.contains_key(id) {
                discarded.insert(id.clone());
            }
        }
        for _ in 0..removed {
            self.shared.counters.record_abandoned();
            telemetry::record_result_abandoned(&self.shared.name);
        }
        removed
    }

    /// Periodic snapshot overlaid with the live counters.
    pub fn metrics(&self) -> PoolMetrics {
        let mut metrics = self.shared.snapshot.read().clone();
        self.shared.counters.overlay(&mut metrics);
        self.shared.overlay_live(&mut metrics);
        metrics
    }

    /// Stop admission, let running jobs finish, then close the output path.
    ///
    /// Idempotent; concurrent callers return once the first shutdown is done.
    pub async fn shutdown(&self) {
        self.stop(None).await;
    }

    /// Like [`shutdown`](Self::shutdown) but aborts workers still running
    /// after `timeout`. Their results are lost.
    pub async fn shutdown_timeout(&self, timeout: Duration) -> ShutdownResult {
        self.stop(Some(timeout)).await
    }

    async fn stop(&self, timeout: Option<Duration>) -> ShutdownResult {
        let lifecycle = &self.shared.lifecycle;
        if !lifecycle.begin() {
            lifecycle.wait_stopped().await;
            return ShutdownResult::Complete;
        }
        debug!(pool = %self.shared.name, "shutdown begun");
        self.shared.input.close();

        let result = match timeout {
            Some(timeout) => lifecycle.wait_for_drain(timeout).await,
            None => ShutdownResult::Complete,
        };

        let handles = std::mem::take(&mut *self.workers.lock());
        if let ShutdownResult::Timeout { remaining } = result {
            warn!(pool = %self.shared.name, remaining, "aborting workers after drain timeout");
            for handle in &handles {
                handle.abort();
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!(pool = %self.shared.name, error = %e, "worker task panicked");
                }
            }
        }

        let dropped = self.shared.input.drain();
        if !dropped.is_empty() {
            warn!(
                pool = %self.shared.name,
                dropped = dropped.len(),
                "dropping queued jobs at shutdown"
            );
            for job in &dropped {
                self.shared.release_id(job.id());
            }
        }

        if let Some(task) = self.metrics_task.lock().take() {
            task.abort();
        }
        self.shared.refresh_snapshot();
        self.shared.output.close();
        lifecycle.finish();

        info!(pool = %self.shared.name, "worker pool stopped");
        result
    }

    fn admit(&self, job: BoxedJob<P>) -> Result<BoxedJob<P>, Rejected<P>> {
        if !self.shared.lifecycle.is_accepting() {
            return Err(self.reject(job, PoolError::ShuttingDown));
        }
        let id = job.id().to_string();
        match self.shared.in_flight.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let error = PoolError::DuplicateJob(entry.key().clone());
                drop(entry);
                Err(self.reject(job, error))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(());
                Ok(job)
            }
        }
    }

    fn accepted(&self) {
        self.shared.counters.record_submitted();
        telemetry::record_job_submitted(&self.shared.name);
    }

    /// Undo admission for a job that never reached the queue.
    fn refuse(&self, job: BoxedJob<P>, error: PoolError) -> Rejected<P> {
        self.shared.in_flight.remove(job.id());
        self.reject(job, error)
    }

    fn reject(&self, job: BoxedJob<P>, error: PoolError) -> Rejected<P> {
        self.shared.counters.record_rejected();
        telemetry::record_rejection(&self.shared.name, rejection_reason(&error));
        Rejected { error, job }
    }
}

impl<P> Drop for WorkerPool<P> {
    fn drop(&mut self) {
        // Workers hold the shared state; cancelling lets them exit.
        self.shared.lifecycle.begin();
        self.shared.input.close();
        if let Some(task) = self.metrics_task.lock().take() {
            task.abort();
        }
    }
}

fn result_error(err: PopError, timeout: Duration) -> PoolError {
    match err {
        PopError::Timeout => PoolError::ResultTimeout(timeout),
        PopError::Cancelled | PopError::Closed => PoolError::ShuttingDown,
    }
}

fn rejection_reason(error: &PoolError) -> &'static str {
    match error {
        PoolError::QueueFull => "queue_full",
        PoolError::SubmissionTimeout(_) => "submission_timeout",
        PoolError::ResultTimeout(_) => "result_timeout",
        PoolError::ShuttingDown => "shutting_down",
        PoolError::DuplicateJob(_) => "duplicate",
    }
}

async fn metrics_loop<P: Send + 'static>(shared: Arc<PoolShared<P>>, period: Duration) {
    let token = shared.lifecycle.token();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => shared.refresh_snapshot(),
        }
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
