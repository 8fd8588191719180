//! worklane: bounded, throttled, prioritized job execution on tokio.
//!
//! The crate is a set of composable pieces plus one facade:
//!
//! - [`scheduler::WorkerPool`]: a fixed set of workers draining a bounded
//!   job queue and publishing results to a bounded result queue.
//! - [`scheduler::PriorityQueue`] and [`scheduler::TaskScheduler`]: deferred,
//!   highest-priority-first admission into a pool on a fixed tick.
//! - [`scheduler::Throttler`]: token-bucket admission control.
//! - [`scheduler::BatchProcessor`]: all-or-nothing batches with one deadline.
//! - [`ConcurrentManager`]: a throttled main lane and an unthrottled
//!   background lane, with aggregated metrics, health and shutdown.
//!
//! # Failure model
//!
//! Accepting a job and the job succeeding are separate steps. Structural
//! failures (queue full, shutdown, rate limit, deadline) come back from the
//! call that submitted or waited. A job's own failure, including a panic,
//! travels inside its [`JobResult`] and never touches sibling jobs.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use worklane::{ConcurrentManager, FnJob, ManagerConfig};
//!
//! # async fn demo() -> Result<(), worklane::ManagerError> {
//! let manager = ConcurrentManager::<u64>::new(ManagerConfig::default());
//! manager.submit_job(FnJob::new("answer", || async { Ok(42) }).boxed())?;
//! let result = manager
//!     .main_pool()
//!     .get_result_with_timeout(Duration::from_secs(1))
//!     .await?;
//! assert_eq!(result.outcome, Ok(42));
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod health;
pub mod manager;
pub mod parallel;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;

pub use config::{ConfigError, EffectiveConfig, ManagerConfig};
pub use health::{HealthChecker, HealthConfig, HealthReport, HealthState};
pub use manager::{ConcurrentManager, ManagerError, ManagerMetrics, MetricsSink};
pub use parallel::{parallel_map, run_with_timeout, ParallelError};
pub use scheduler::{
    levels, BatchConfig, BatchError, BatchProcessor, BoxedJob, FnJob, Job, JobError, JobResult,
    PoolConfig, PoolError, PoolMetrics, PriorityQueue, SchedulerConfig, TaskScheduler,
    ThrottleConfig, ThrottleError, Throttler, WorkerPool,
};
pub use shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};
