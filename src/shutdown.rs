//! Graceful shutdown coordination for pools and the manager.
//!
//! Each component owns one coordinator: a state machine plus the
//! cancellation token every blocking wait selects on, and a counter of
//! in-flight jobs that shutdown drains before stopping.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Result of a shutdown operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: u32 },
}

impl ShutdownResult {
    /// Combine the outcome of two independent drains.
    pub fn merge(self, other: ShutdownResult) -> ShutdownResult {
        match (self, other) {
            (Self::Complete, Self::Complete) => Self::Complete,
            (Self::Timeout { remaining: a }, Self::Timeout { remaining: b }) => {
                Self::Timeout { remaining: a + b }
            }
            (Self::Timeout { remaining }, Self::Complete)
            | (Self::Complete, Self::Timeout { remaining }) => Self::Timeout { remaining },
        }
    }
}

/// Coordinates graceful shutdown of one component.
pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    token: CancellationToken,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
    stopped: Notify,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Coordinator whose token is cancelled when `parent` is.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        Self {
            state: RwLock::new(ShutdownState::Running),
            token,
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
            stopped: Notify::new(),
        }
    }

    /// Get current shutdown state.
    pub fn state(&self) -> ShutdownState {
        *self.state.read()
    }

    /// Check if accepting new work. A cancelled parent token also stops admission.
    pub fn is_accepting(&self) -> bool {
        *self.state.read() == ShutdownState::Running && !self.token.is_cancelled()
    }

    /// Clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Completes when the component is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Track an in-flight unit of work. Returns None if shutting down.
    pub fn track(&self) -> Option<ShutdownGuard> {
        if !self.is_accepting() {
            return None;
        }
        Some(self.enter())
    }

    /// Track work that was already admitted, regardless of state.
    pub fn enter(&self) -> ShutdownGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ShutdownGuard {
            counter: self.in_flight.clone(),
            notify: self.notify.clone(),
        }
    }

    /// Current in-flight count.
    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Move from Running to Draining and fire the cancellation token.
    ///
    /// Returns false if shutdown had already begun.
    pub fn begin(&self) -> bool {
        {
            let mut state = self.state.write();
            if *state != ShutdownState::Running {
                return false;
            }
            *state = ShutdownState::Draining;
        }
        self.token.cancel();
        true
    }

    /// Mark the component stopped and release everyone waiting on it.
    pub fn finish(&self) {
        *self.state.write() = ShutdownState::Stopped;
        self.stopped.notify_waiters();
    }

    /// Wait until `finish` has been called.
    pub async fn wait_stopped(&self) {
        loop {
            let notified = self.stopped.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state() == ShutdownState::Stopped {
                return;
            }
            notified.await;
        }
    }

    /// Initiate shutdown: stop accepting, wait for drain, mark stopped.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        self.begin();
        let result = self.wait_for_drain(timeout).await;
        self.finish();
        result
    }

    /// Wait until no work is in flight, or the timeout elapses.
    pub async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let count = self.in_flight_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }

            let remaining_time = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining_time.is_zero() {
                return ShutdownResult::Timeout { remaining: count };
            }

            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep(remaining_time) => {
                    let final_count = self.in_flight_count();
                    if final_count == 0 {
                        return ShutdownResult::Complete;
                    }
                    return ShutdownResult::Timeout { remaining: final_count };
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for in-flight tracking.
pub struct ShutdownGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_one();
    }
}
