//! Job execution primitives for worklane.
//!
//! Bounded worker pools, the priority buffer and its periodic scheduler,
//! token-bucket throttling, and synchronous batch execution.

mod batch;
pub mod job;
mod metrics;
mod pool;
mod priority;
mod queue;
mod task_scheduler;
mod throttle;
mod worker;

pub use batch::{BatchConfig, BatchError, BatchProcessor};
pub use job::{BoxedJob, FnJob, Job, JobError, JobResult};
pub use metrics::{PoolCounters, PoolMetrics};
pub use pool::{PoolConfig, PoolError, Rejected, WorkerPool};
pub use priority::{levels, PriorityEntry, PriorityQueue};
pub use queue::{BoundedQueue, PopError, PushError};
pub use task_scheduler::{SchedulerConfig, SchedulerStats, TaskScheduler};
pub use throttle::{ThrottleConfig, ThrottleError, Throttler};
