//! Manager configuration from environment variables or a TOML file.
//!
//! Values come from `WORKLANE_*` environment variables with defaults.
//! Invalid values fall back to defaults without crashing; zero values are
//! floored to safe minima.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `WORKLANE_MAIN_WORKERS` | 4 | Main lane workers (0 = one per CPU) |
//! | `WORKLANE_BACKGROUND_WORKERS` | 2 | Background lane workers (0 = one per CPU) |
//! | `WORKLANE_QUEUE_CAPACITY` | 100 | Main lane queue capacity |
//! | `WORKLANE_BATCH_SIZE` | 10 | Batch / chunk size |
//! | `WORKLANE_THROTTLE_RATE` | 100 | Tokens per refill |
//! | `WORKLANE_THROTTLE_INTERVAL_MS` | 1000 | Refill interval |
//! | `WORKLANE_SCHEDULER_INTERVAL_MS` | 100 | Scheduler tick |
//! | `WORKLANE_SCHEDULER_MAX_PER_TICK` | 10 | Jobs dispatched per tick |
//! | `WORKLANE_BATCH_TIMEOUT_MS` | 5000 | Batch deadline |
//! | `WORKLANE_BATCH_POLL_MS` | 100 | Batch result poll |
//! | `WORKLANE_POOL_METRICS_MS` | 1000 | Pool metrics refresh |
//! | `WORKLANE_MANAGER_METRICS_MS` | 5000 | Manager metrics refresh |
//! | `WORKLANE_SHUTDOWN_TIMEOUT` | 30 | Pool drain timeout (secs) |
//!
//! # File format
//!
//! ```toml
//! [pools]
//! main_workers = 8
//! queue_capacity = 256
//!
//! [throttle]
//! rate = 50
//! interval_ms = 500
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::{BatchConfig, PoolConfig, SchedulerConfig, ThrottleConfig};

/// Everything needed to build a [`ConcurrentManager`](crate::ConcurrentManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub main_workers: usize,
    pub background_workers: usize,
    /// Main lane capacity. The background lane gets half, minimum 1.
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub throttle_rate: usize,
    pub throttle_interval: Duration,
    pub scheduler_interval: Duration,
    pub scheduler_max_per_tick: usize,
    pub batch_timeout: Duration,
    pub batch_poll_interval: Duration,
    pub pool_metrics_interval: Duration,
    pub manager_metrics_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            main_workers: 4,
            background_workers: 2,
            queue_capacity: 100,
            batch_size: 10,
            throttle_rate: 100,
            throttle_interval: Duration::from_secs(1),
            scheduler_interval: Duration::from_millis(100),
            scheduler_max_per_tick: 10,
            batch_timeout: Duration::from_secs(5),
            batch_poll_interval: Duration::from_millis(100),
            pool_metrics_interval: Duration::from_secs(1),
            manager_metrics_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ManagerConfig {
    pub fn background_capacity(&self) -> usize {
        (self.queue_capacity / 2).max(1)
    }

    pub fn main_pool(&self) -> PoolConfig {
        PoolConfig {
            name: "main".to_string(),
            workers: self.main_workers,
            queue_capacity: self.queue_capacity,
            metrics_interval: self.pool_metrics_interval,
        }
    }

    pub fn background_pool(&self) -> PoolConfig {
        PoolConfig {
            name: "background".to_string(),
            workers: self.background_workers,
            queue_capacity: self.background_capacity(),
            metrics_interval: self.pool_metrics_interval,
        }
    }

    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            rate: self.throttle_rate,
            interval: self.throttle_interval,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: self.scheduler_interval,
            max_per_tick: self.scheduler_max_per_tick,
        }
    }

    pub fn batch(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
            timeout: self.batch_timeout,
            poll_interval: self.batch_poll_interval,
        }
    }

    /// Apply the floors every loader guarantees.
    pub fn normalized(mut self) -> Self {
        const MIN_INTERVAL: Duration = Duration::from_millis(1);
        self.queue_capacity = self.queue_capacity.max(1);
        self.batch_size = self.batch_size.max(1);
        self.throttle_rate = self.throttle_rate.max(1);
        self.scheduler_max_per_tick = self.scheduler_max_per_tick.max(1);
        self.throttle_interval = self.throttle_interval.max(MIN_INTERVAL);
        self.scheduler_interval = self.scheduler_interval.max(MIN_INTERVAL);
        self.batch_timeout = self.batch_timeout.max(MIN_INTERVAL);
        self.batch_poll_interval = self.batch_poll_interval.max(MIN_INTERVAL);
        self.pool_metrics_interval = self.pool_metrics_interval.max(Duration::from_millis(10));
        self.manager_metrics_interval =
            self.manager_metrics_interval.max(Duration::from_millis(10));
        self.shutdown_timeout = self.shutdown_timeout.max(Duration::from_secs(1));
        self
    }

    /// Settings that load but are likely mistakes.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.main_workers != 0
            && self.background_workers != 0
            && self.background_workers > self.main_workers
        {
            warnings.push(format!(
                "background_workers ({}) exceeds main_workers ({})",
                self.background_workers, self.main_workers
            ));
        }
        if self.batch_size > self.queue_capacity {
            warnings.push(format!(
                "batch_size ({}) exceeds queue_capacity ({}); full batches will be refused",
                self.batch_size, self.queue_capacity
            ));
        }
        if self.batch_poll_interval > self.batch_timeout {
            warnings.push(format!(
                "batch_poll_interval ({:?}) exceeds batch_timeout ({:?})",
                self.batch_poll_interval, self.batch_timeout
            ));
        }
        if self.scheduler_max_per_tick > self.background_capacity() {
            warnings.push(format!(
                "scheduler_max_per_tick ({}) exceeds background capacity ({})",
                self.scheduler_max_per_tick,
                self.background_capacity()
            ));
        }
        if self.shutdown_timeout < self.batch_timeout {
            warnings.push(format!(
                "shutdown_timeout ({:?}) is shorter than batch_timeout ({:?})",
                self.shutdown_timeout, self.batch_timeout
            ));
        }
        warnings
    }

    /// Serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            main_workers: self.main_workers,
            background_workers: self.background_workers,
            queue_capacity: self.queue_capacity,
            background_capacity: self.background_capacity(),
            batch_size: self.batch_size,
            throttle_rate: self.throttle_rate,
            throttle_interval_ms: millis(self.throttle_interval),
            scheduler_interval_ms: millis(self.scheduler_interval),
            scheduler_max_per_tick: self.scheduler_max_per_tick,
            batch_timeout_ms: millis(self.batch_timeout),
            batch_poll_ms: millis(self.batch_poll_interval),
            pool_metrics_ms: millis(self.pool_metrics_interval),
            manager_metrics_ms: millis(self.manager_metrics_interval),
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
        }
    }
}

/// Effective configuration summary, keyed like the environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub main_workers: usize,
    pub background_workers: usize,
    pub queue_capacity: usize,
    pub background_capacity: usize,
    pub batch_size: usize,
    pub throttle_rate: usize,
    pub throttle_interval_ms: u64,
    pub scheduler_interval_ms: u64,
    pub scheduler_max_per_tick: usize,
    pub batch_timeout_ms: u64,
    pub batch_poll_ms: u64,
    pub pool_metrics_ms: u64,
    pub manager_metrics_ms: u64,
    pub shutdown_timeout_secs: u64,
}

impl EffectiveConfig {
    /// `(ENV_NAME, value)` pairs in documentation order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("WORKLANE_MAIN_WORKERS", self.main_workers.to_string()),
            ("WORKLANE_BACKGROUND_WORKERS", self.background_workers.to_string()),
            ("WORKLANE_QUEUE_CAPACITY", self.queue_capacity.to_string()),
            ("WORKLANE_BATCH_SIZE", self.batch_size.to_string()),
            ("WORKLANE_THROTTLE_RATE", self.throttle_rate.to_string()),
            ("WORKLANE_THROTTLE_INTERVAL_MS", self.throttle_interval_ms.to_string()),
            ("WORKLANE_SCHEDULER_INTERVAL_MS", self.scheduler_interval_ms.to_string()),
            ("WORKLANE_SCHEDULER_MAX_PER_TICK", self.scheduler_max_per_tick.to_string()),
            ("WORKLANE_BATCH_TIMEOUT_MS", self.batch_timeout_ms.to_string()),
            ("WORKLANE_BATCH_POLL_MS", self.batch_poll_ms.to_string()),
            ("WORKLANE_POOL_METRICS_MS", self.pool_metrics_ms.to_string()),
            ("WORKLANE_MANAGER_METRICS_MS", self.manager_metrics_ms.to_string()),
            ("WORKLANE_SHUTDOWN_TIMEOUT", self.shutdown_timeout_secs.to_string()),
        ]
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(parse_u64(key, millis(default)))
}

/// Load configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> ManagerConfig {
    let d = ManagerConfig::default();
    ManagerConfig {
        main_workers: parse_usize("WORKLANE_MAIN_WORKERS", d.main_workers),
        background_workers: parse_usize("WORKLANE_BACKGROUND_WORKERS", d.background_workers),
        queue_capacity: parse_usize("WORKLANE_QUEUE_CAPACITY", d.queue_capacity),
        batch_size: parse_usize("WORKLANE_BATCH_SIZE", d.batch_size),
        throttle_rate: parse_usize("WORKLANE_THROTTLE_RATE", d.throttle_rate),
        throttle_interval: parse_millis("WORKLANE_THROTTLE_INTERVAL_MS", d.throttle_interval),
        scheduler_interval: parse_millis("WORKLANE_SCHEDULER_INTERVAL_MS", d.scheduler_interval),
        scheduler_max_per_tick: parse_usize(
            "WORKLANE_SCHEDULER_MAX_PER_TICK",
            d.scheduler_max_per_tick,
        ),
        batch_timeout: parse_millis("WORKLANE_BATCH_TIMEOUT_MS", d.batch_timeout),
        batch_poll_interval: parse_millis("WORKLANE_BATCH_POLL_MS", d.batch_poll_interval),
        pool_metrics_interval: parse_millis("WORKLANE_POOL_METRICS_MS", d.pool_metrics_interval),
        manager_metrics_interval: parse_millis(
            "WORKLANE_MANAGER_METRICS_MS",
            d.manager_metrics_interval,
        ),
        shutdown_timeout: Duration::from_secs(parse_u64(
            "WORKLANE_SHUTDOWN_TIMEOUT",
            d.shutdown_timeout.as_secs(),
        )),
    }
    .normalized()
}

/// Load a TOML file. Keys it omits keep their defaults.
pub fn load_file(path: impl AsRef<Path>) -> Result<ManagerConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    from_toml_str(&text)
}

/// Parse TOML text. Unknown keys are rejected.
pub fn from_toml_str(text: &str) -> Result<ManagerConfig, ConfigError> {
    let file: FileConfig = toml::from_str(text)?;
    Ok(file.apply(ManagerConfig::default()).normalized())
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    pools: PoolsSection,
    #[serde(default)]
    throttle: ThrottleSection,
    #[serde(default)]
    scheduler: SchedulerSection,
    #[serde(default)]
    batch: BatchSection,
    #[serde(default)]
    metrics: MetricsSection,
    #[serde(default)]
    shutdown: ShutdownSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolsSection {
    main_workers: Option<usize>,
    background_workers: Option<usize>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThrottleSection {
    rate: Option<usize>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchedulerSection {
    interval_ms: Option<u64>,
    max_per_tick: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchSection {
    size: Option<usize>,
    timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetricsSection {
    pool_interval_ms: Option<u64>,
    manager_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShutdownSection {
    timeout_secs: Option<u64>,
}

impl FileConfig {
    fn apply(self, mut c: ManagerConfig) -> ManagerConfig {
        let ms = Duration::from_millis;
        if let Some(v) = self.pools.main_workers {
            c.main_workers = v;
        }
        if let Some(v) = self.pools.background_workers {
            c.background_workers = v;
        }
        if let Some(v) = self.pools.queue_capacity {
            c.queue_capacity = v;
        }
        if let Some(v) = self.throttle.rate {
            c.throttle_rate = v;
        }
        if let Some(v) = self.throttle.interval_ms {
            c.throttle_interval = ms(v);
        }
        if let Some(v) = self.scheduler.interval_ms {
            c.scheduler_interval = ms(v);
        }
        if let Some(v) = self.scheduler.max_per_tick {
            c.scheduler_max_per_tick = v;
        }
        if let Some(v) = self.batch.size {
            c.batch_size = v;
        }
        if let Some(v) = self.batch.timeout_ms {
            c.batch_timeout = ms(v);
        }
        if let Some(v) = self.batch.poll_interval_ms {
            c.batch_poll_interval = ms(v);
        }
        if let Some(v) = self.metrics.pool_interval_ms {
            c.pool_metrics_interval = ms(v);
        }
        if let Some(v) = self.metrics.manager_interval_ms {
            c.manager_metrics_interval = ms(v);
        }
        if let Some(v) = self.shutdown.timeout_secs {
            c.shutdown_timeout = Duration::from_secs(v);
        }
        c
    }
}
