//! Periodic priority drain into a worker pool.
//!
//! Each tick pops up to `max_per_tick` entries, highest priority first, and
//! offers them to the target pool without waiting. An entry the pool cannot
//! take goes back to its original position and the tick ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::job::BoxedJob;
use super::pool::{PoolError, WorkerPool};
use super::priority::{PriorityEntry, PriorityQueue};
use crate::telemetry;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Upper bound on submissions per tick.
    pub max_per_tick: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            max_per_tick: 10,
        }
    }
}

/// Cumulative dispatch counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Entries accepted by the pool.
    pub dispatched: u64,
    /// Entries put back because the pool was full or stopping.
    pub requeued: u64,
    /// Entries dropped because their id was already in flight.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    dispatched: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Drains a [`PriorityQueue`] into a [`WorkerPool`] on a fixed tick.
pub struct TaskScheduler<P> {
    queue: Arc<PriorityQueue<P>>,
    pool: Arc<WorkerPool<P>>,
    stats: Arc<StatsCounters>,
    max_per_tick: usize,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Send + 'static> TaskScheduler<P> {
    /// Start ticking. Must be called inside a tokio runtime.
    pub fn new(pool: Arc<WorkerPool<P>>, config: SchedulerConfig) -> Self {
        Self::with_parent(pool, config, &CancellationToken::new())
    }

    /// Like [`new`](Self::new); the tick loop also ends when `parent` is cancelled.
    pub fn with_parent(
        pool: Arc<WorkerPool<P>>,
        config: SchedulerConfig,
        parent: &CancellationToken,
    ) -> Self {
        let queue = Arc::new(PriorityQueue::new());
        let stats = Arc::new(StatsCounters::default());
        let stop = parent.child_token();
        let max_per_tick = config.max_per_tick.max(1);
        let period = config.tick_interval.max(Duration::from_millis(1));

        let task = tokio::spawn(tick_loop(
            queue.clone(),
            pool.clone(),
            stats.clone(),
            max_per_tick,
            period,
            stop.clone(),
        ));

        Self {
            queue,
            pool,
            stats,
            max_per_tick,
            stop,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue a job for prioritized admission into the pool.
    pub fn schedule(&self, job: BoxedJob<P>) {
        self.queue.push(job);
        telemetry::record_scheduled_pending(self.queue.size());
    }

    /// Run one dispatch pass now. Returns how many entries the pool accepted.
    pub fn run_once(&self) -> usize {
        dispatch(&self.queue, &self.pool, &self.stats, self.max_per_tick)
    }

    /// Entries waiting for dispatch.
    pub fn pending(&self) -> usize {
        self.queue.size()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.snapshot()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Halt the tick loop. Pending entries stay queued; jobs already in the
    /// pool are unaffected. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!(pending = self.queue.size(), "scheduler stopped");
        }
    }
}

impl<P> Drop for TaskScheduler<P> {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn tick_loop<P: Send + 'static>(
    queue: Arc<PriorityQueue<P>>,
    pool: Arc<WorkerPool<P>>,
    stats: Arc<StatsCounters>,
    max_per_tick: usize,
    period: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                dispatch(&queue, &pool, &stats, max_per_tick);
                telemetry::record_scheduled_pending(queue.size());
            }
        }
    }
}

fn dispatch<P: Send + 'static>(
    queue: &PriorityQueue<P>,
    pool: &WorkerPool<P>,
    stats: &StatsCounters,
    max_per_tick: usize,
) -> usize {
    let mut dispatched = 0;
    for _ in 0..max_per_tick {
        let Some(PriorityEntry {
            job,
            priority,
            sequence,
            enqueued_at,
        }) = queue.pop()
        else {
            break;
        };

        match pool.try_submit(job) {
            Ok(()) => {
                dispatched += 1;
                stats.dispatched.fetch_add(1, Ordering::Relaxed);
            }
            Err(rejected) => match rejected.error {
                PoolError::DuplicateJob(ref id) => {
                    warn!(job_id = %id, priority, "dropping scheduled job: id already in flight");
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
                ref error => {
                    debug!(job_id = %rejected.job.id(), %error, "pool refused scheduled job; requeued");
                    stats.requeued.fetch_add(1, Ordering::Relaxed);
                    queue.requeue(PriorityEntry {
                        job: rejected.job,
                        priority,
                        sequence,
                        enqueued_at,
                    });
                    break;
                }
            },
        }
    }
    dispatched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{FnJob, JobError};
    use crate::scheduler::pool::PoolConfig;
    use tokio::sync::Semaphore;

    fn job(id: &str, priority: i32) -> BoxedJob<String> {
        let id_owned = id.to_string();
        FnJob::new(id, move || {
            let id = id_owned.clone();
            async move { Ok(id) }
        })
        .with_priority(priority)
        .boxed()
    }

    fn gate_job(gate: Arc<Semaphore>) -> BoxedJob<String> {
        FnJob::new("gate", move || {
            let gate = gate.clone();
            async move {
                let permit = gate.acquire().await.map_err(|e| JobError::from_error(&e))?;
                permit.forget();
                Ok("gate".to_string())
            }
        })
        .boxed()
    }

    fn manual() -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_secs(3600),
            max_per_tick: 10,
        }
    }

    async fn wait_idle(pool: &WorkerPool<String>) {
        for _ in 0..500 {
            if pool.queue_len() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("pool never picked up the gate job");
    }

    #[tokio::test]
    async fn dispatches_highest_priority_first() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::new("bg", 1, 10)));
        let gate = Arc::new(Semaphore::new(0));
        pool.submit(gate_job(gate.clone())).unwrap();
        wait_idle(&pool).await;

        let scheduler = TaskScheduler::new(pool.clone(), manual());
        scheduler.schedule(job("p3", 3));
        scheduler.schedule(job("p7-a", 7));
        scheduler.schedule(job("p7-b", 7));
        scheduler.schedule(job("p1", 1));

        assert_eq!(scheduler.run_once(), 4);
        gate.add_permits(1);

        let mut order = Vec::new();
        for _ in 0..5 {
            let r = pool.get_result_with_timeout(Duration::from_secs(1)).await.unwrap();
            order.push(r.job_id);
        }
        assert_eq!(order, vec!["gate", "p7-a", "p7-b", "p3", "p1"]);

        scheduler.stop();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn full_pool_requeues_without_loss() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::new("bg", 1, 1)));
        let gate = Arc::new(Semaphore::new(0));
        pool.submit(gate_job(gate.clone())).unwrap();
        wait_idle(&pool).await;

        let scheduler = TaskScheduler::new(pool.clone(), manual());
        scheduler.schedule(job("a", 5));
        scheduler.schedule(job("b", 5));
        scheduler.schedule(job("c", 5));

        assert_eq!(scheduler.run_once(), 1);
        assert_eq!(scheduler.pending(), 2);
        assert_eq!(
            scheduler.stats(),
            SchedulerStats {
                dispatched: 1,
                requeued: 1,
                dropped: 0
            }
        );

        gate.add_permits(1);
        let mut seen = Vec::new();
        while seen.len() < 4 {
            scheduler.run_once();
            if let Ok(r) = pool.get_result_with_timeout(Duration::from_millis(50)).await {
                seen.push(r.job_id);
            }
        }
        assert_eq!(seen, vec!["gate", "a", "b", "c"]);

        scheduler.stop();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_in_flight_id_is_dropped() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::new("bg", 1, 4)));
        let gate = Arc::new(Semaphore::new(0));
        pool.submit(gate_job(gate.clone())).unwrap();

        let scheduler = TaskScheduler::new(pool.clone(), manual());
        scheduler.schedule(job("gate", 9));
        scheduler.run_once();

        assert_eq!(scheduler.stats().dropped, 1);
        assert_eq!(scheduler.pending(), 0);

        gate.add_permits(1);
        scheduler.stop();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn tick_loop_drains_on_its_own() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::new("bg", 2, 10)));
        let scheduler = TaskScheduler::new(
            pool.clone(),
            SchedulerConfig {
                tick_interval: Duration::from_millis(10),
                max_per_tick: 2,
            },
        );
        for i in 0..5 {
            scheduler.schedule(job(&format!("j{i}"), 5));
        }

        for _ in 0..5 {
            pool.get_result_with_timeout(Duration::from_secs(1)).await.unwrap();
        }
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.stats().dispatched, 5);

        scheduler.stop();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_keeps_pending() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::new("bg", 1, 4)));
        let scheduler = TaskScheduler::new(pool.clone(), SchedulerConfig::default());
        scheduler.stop();
        scheduler.stop();
        assert!(scheduler.is_stopped());

        scheduler.schedule(job("late", 1));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(scheduler.pending(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn stopped_pool_keeps_entries_queued() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::new("bg", 1, 4)));
        pool.shutdown().await;

        let scheduler = TaskScheduler::new(pool.clone(), manual());
        scheduler.schedule(job("x", 1));
        assert_eq!(scheduler.run_once(), 0);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.stats().requeued, 1);
        scheduler.stop();
    }
}
