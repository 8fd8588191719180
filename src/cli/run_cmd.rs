// Copyright 2025-2026 worklane Contributors
// SPDX-License-Identifier: Apache-2.0

//! Synthetic workload for smoke-testing a configuration.
//!
//! Two thirds of the jobs go through the main lane as batches; the rest are
//! scheduled onto the background lane with rotating priorities. Every
//! `fail_every`-th job fails on purpose so failure accounting shows up.

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::config::ManagerConfig;
use crate::manager::{ConcurrentManager, ManagerError, ManagerMetrics};
use crate::scheduler::{BoxedJob, FnJob, JobError};

/// Shape of the synthetic workload.
#[derive(Debug, Clone)]
pub struct WorkloadOptions {
    pub jobs: usize,
    pub job_duration: Duration,
    /// 0 disables injected failures.
    pub fail_every: usize,
    /// Upper bound on waiting for scheduled jobs to finish.
    pub drain_timeout: Duration,
}

impl Default for WorkloadOptions {
    fn default() -> Self {
        Self {
            jobs: 100,
            job_duration: Duration::from_millis(5),
            fail_every: 10,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

fn synthetic_job(index: usize, opts: &WorkloadOptions) -> BoxedJob<u64> {
    let delay = opts.job_duration;
    let fails = opts.fail_every != 0 && (index + 1) % opts.fail_every == 0;
    FnJob::new(format!("job-{index}"), move || async move {
        tokio::time::sleep(delay).await;
        if fails {
            Err(JobError::failed(format!("synthetic failure in job {index}")))
        } else {
            Ok(index as u64)
        }
    })
    .with_priority((index % 10) as i32)
    .boxed()
}

/// Run the workload on a fresh manager and return its final metrics.
pub async fn run_workload(
    config: ManagerConfig,
    opts: &WorkloadOptions,
) -> Result<ManagerMetrics, ManagerError> {
    let manager = ConcurrentManager::<u64>::new(config);
    let started = Instant::now();

    let (scheduled, batched): (Vec<usize>, Vec<usize>) =
        (0..opts.jobs).partition(|i| i % 3 == 2);

    for &index in &scheduled {
        manager.schedule_job(synthetic_job(index, opts))?;
    }

    let batch_size = manager.config().batch_size;
    for chunk in batched.chunks(batch_size) {
        let jobs = chunk.iter().map(|&i| synthetic_job(i, opts)).collect();
        manager.process_batch(jobs).await?;
    }

    let deadline = Instant::now() + opts.drain_timeout;
    let mut finished = 0;
    while finished < scheduled.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match manager.background_pool().get_result_with_timeout(remaining).await {
            Ok(_) => finished += 1,
            Err(_) => break,
        }
    }

    let metrics = manager.get_metrics();
    manager.shutdown().await;
    info!(
        jobs = opts.jobs,
        scheduled = scheduled.len(),
        scheduled_finished = finished,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "synthetic workload finished"
    );
    Ok(metrics)
}
