//! Token-bucket admission throttle.
//!
//! The bucket holds at most `rate` tokens and is topped back up to `rate`
//! every `interval` by an independent refill loop. Missed ticks never
//! over-fill it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::telemetry;

/// Throttle configuration.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub rate: usize,
    pub interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            rate: 100,
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThrottleError {
    #[error("throttler is stopped")]
    Stopped,

    #[error("no token available within {0:?}")]
    Timeout(Duration),
}

/// Token-bucket rate limiter.
pub struct Throttler {
    bucket: Arc<Semaphore>,
    rate: usize,
    interval: Duration,
    stop: CancellationToken,
    refill: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Throttler {
    /// Create a full bucket and start the refill loop.
    pub fn new(config: ThrottleConfig) -> Self {
        Self::with_parent(config, &CancellationToken::new())
    }

    /// Like [`new`](Self::new); the refill loop also stops when `parent` is cancelled.
    pub fn with_parent(config: ThrottleConfig, parent: &CancellationToken) -> Self {
        let rate = config.rate.clamp(1, Semaphore::MAX_PERMITS);
        let interval = config.interval.max(Duration::from_millis(1));
        let bucket = Arc::new(Semaphore::new(rate));
        let stop = parent.child_token();

        let handle = tokio::spawn(refill_loop(bucket.clone(), rate, interval, stop.clone()));

        Self {
            bucket,
            rate,
            interval,
            stop,
            refill: parking_lot::Mutex::new(Some(handle)),
        }
    }

    /// Try to take a token without waiting.
    pub fn allow(&self) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        match self.bucket.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => {
                telemetry::record_throttled();
                false
            }
        }
    }

    /// Wait until a token is available and take it.
    ///
    /// Returns `Stopped` once the throttler is stopped instead of waiting
    /// for a refill that will never come.
    pub async fn wait(&self) -> Result<(), ThrottleError> {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => Err(ThrottleError::Stopped),
            permit = self.bucket.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    Ok(())
                }
                Err(_) => Err(ThrottleError::Stopped),
            },
        }
    }

    /// [`wait`](Self::wait) bounded by `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), ThrottleError> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(ThrottleError::Timeout(timeout)),
        }
    }

    /// Tokens currently in the bucket.
    pub fn available(&self) -> usize {
        self.bucket.available_permits()
    }

    pub fn rate(&self) -> usize {
        self.rate
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Halt the refill loop. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
        if let Some(handle) = self.refill.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for Throttler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refill_loop(bucket: Arc<Semaphore>, rate: usize, interval: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                tracing::debug!("throttler: refill loop stopped");
                return;
            }
            _ = ticker.tick() => {
                // Only this loop adds permits, so the bucket stays <= rate.
                let missing = rate.saturating_sub(bucket.available_permits());
                if missing > 0 {
                    bucket.add_permits(missing);
                }
            }
        }
    }
}
