//! Synchronous batch execution over a worker pool.
//!
//! A batch is all-or-nothing: either every submitted job's result arrives
//! before the deadline and the results come back in input order, or the call
//! fails and whatever was collected is dropped. Jobs are never cancelled by a
//! failed batch; their late results are discarded by the pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::job::{BoxedJob, JobResult};
use super::pool::{PoolError, WorkerPool};
use crate::telemetry;

/// Batch processing configuration.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Size hint for callers that split work into batches.
    pub batch_size: usize,
    /// Overall deadline for one `process_batch` call.
    pub timeout: Duration,
    /// Upper bound on a single result wait inside the deadline.
    pub poll_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("failed to submit job {job_id}: {source}")]
    Submit {
        job_id: String,
        #[source]
        source: PoolError,
    },

    #[error("batch timed out with {received} of {expected} results")]
    Timeout { received: usize, expected: usize },

    #[error("pool shut down before the batch completed")]
    ShuttingDown,

    #[error("batch contains job id {0} more than once")]
    DuplicateId(String),
}

/// Submits a set of jobs and waits for all of their results.
pub struct BatchProcessor<P> {
    pool: Arc<WorkerPool<P>>,
    config: BatchConfig,
}

impl<P: Send + 'static> BatchProcessor<P> {
    pub fn new(pool: Arc<WorkerPool<P>>, config: BatchConfig) -> Self {
        Self { pool, config }
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Run `jobs` on the pool and return their results in input order.
    ///
    /// Individual job failures are reported inside the results; the call
    /// itself fails only on submission refusal, shutdown, or deadline.
    pub async fn process_batch(
        &self,
        jobs: Vec<BoxedJob<P>>,
    ) -> Result<Vec<JobResult<P>>, BatchError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let started = std::time::Instant::now();
        let outcome = self.run(jobs).await;
        let label = match &outcome {
            Ok(_) => "ok",
            Err(BatchError::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        telemetry::record_batch(label, started.elapsed());
        outcome
    }

    async fn run(&self, jobs: Vec<BoxedJob<P>>) -> Result<Vec<JobResult<P>>, BatchError> {
        let deadline = Instant::now() + self.config.timeout;
        let order: Vec<String> = jobs.iter().map(|j| j.id().to_string()).collect();

        let mut seen = HashSet::with_capacity(order.len());
        for id in &order {
            if !seen.insert(id.as_str()) {
                return Err(BatchError::DuplicateId(id.clone()));
            }
        }

        for (submitted, job) in jobs.into_iter().enumerate() {
            if let Err(source) = self.pool.submit(job) {
                let job_id = order[submitted].clone();
                warn!(%job_id, %source, submitted, "batch submission refused");
                self.pool.discard_results(&order[..submitted]);
                return Err(BatchError::Submit { job_id, source });
            }
        }

        let mut outstanding: HashSet<String> = order.iter().cloned().collect();
        let mut collected: HashMap<String, JobResult<P>> = HashMap::with_capacity(order.len());

        while !outstanding.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.abandon(&outstanding, collected.len(), order.len()));
            }
            let wait = remaining.min(self.config.poll_interval);
            let next = self
                .pool
                .get_result_matching(|r| outstanding.contains(&r.job_id), wait)
                .await;
            match next {
                Ok(result) => {
                    outstanding.remove(&result.job_id);
                    collected.insert(result.job_id.clone(), result);
                }
                Err(PoolError::ResultTimeout(_)) => continue,
                Err(_) => {
                    self.pool.discard_results(&outstanding);
                    return Err(BatchError::ShuttingDown);
                }
            }
        }

        let results = order
            .iter()
            .filter_map(|id| collected.remove(id))
            .collect::<Vec<_>>();
        debug!(jobs = results.len(), "batch complete");
        Ok(results)
    }

    fn abandon(&self, outstanding: &HashSet<String>, received: usize, expected: usize) -> BatchError {
        warn!(received, expected, "batch deadline passed; dropping partial results");
        self.pool.discard_results(outstanding);
        BatchError::Timeout { received, expected }
    }
}
