//! Bounded FIFO queue shared between producers and workers.
//!
//! Occupancy never exceeds the configured capacity. Non-blocking operations
//! hand the item back on refusal; waiting operations select on a
//! cancellation token and an optional deadline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Refused push. The item is always handed back.
#[derive(Debug)]
pub enum PushError<T> {
    Full(T),
    Closed(T),
    Cancelled(T),
    Timeout(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) | Self::Cancelled(item) | Self::Timeout(item) => {
                item
            }
        }
    }
}

/// Why a waiting pop returned without an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    Timeout,
    Cancelled,
    Closed,
}

/// Thread-safe bounded queue.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    closed: AtomicBool,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            closed: AtomicBool::new(false),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Enqueue without waiting.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        {
            let mut items = self.items.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(PushError::Closed(item));
            }
            if items.len() >= self.capacity {
                return Err(PushError::Full(item));
            }
            items.push_back(item);
        }
        self.not_empty.notify_waiters();
        Ok(())
    }

    /// Enqueue, waiting for space until cancelled or the deadline passes.
    pub async fn push(
        &self,
        mut item: T,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<(), PushError<T>> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(back)) => item = back,
                Err(other) => return Err(other),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PushError::Cancelled(item)),
                _ = sleep_until(deadline) => return Err(PushError::Timeout(item)),
                _ = &mut notified => {}
            }
        }
    }

    /// Wait until the queue has room or is closed, without reserving a slot.
    pub async fn wait_for_space(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<(), PopError> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() || self.len() < self.capacity {
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PopError::Cancelled),
                _ = sleep_until(deadline) => return Err(PopError::Timeout),
                _ = &mut notified => {}
            }
        }
    }

    /// Dequeue the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_waiters();
        }
        item
    }

    /// Dequeue, waiting until an item arrives, the queue is cancelled or
    /// closed, or the deadline passes. Buffered items are returned even after
    /// cancellation.
    pub async fn pop(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<T, PopError> {
        self.wait_for(cancel, deadline, || self.try_pop()).await
    }

    /// Remove the first item matching `pred`, leaving the rest in order.
    pub fn take_first<F>(&self, pred: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let item = {
            let mut items = self.items.lock();
            let idx = items.iter().position(pred);
            idx.and_then(|idx| items.remove(idx))
        };
        if item.is_some() {
            self.not_full.notify_waiters();
        }
        item
    }

    /// Waiting form of [`take_first`](Self::take_first).
    pub async fn take_first_wait<F>(
        &self,
        mut pred: F,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<T, PopError>
    where
        F: FnMut(&T) -> bool,
    {
        self.wait_for(cancel, deadline, || self.take_first(&mut pred)).await
    }

    /// Remove every item matching `pred`. Returns how many were removed.
    pub fn remove_where<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let removed = {
            let mut items = self.items.lock();
            let before = items.len();
            items.retain(|item| !pred(item));
            before - items.len()
        };
        if removed > 0 {
            self.not_full.notify_waiters();
        }
        removed
    }

    /// Remove and return everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.items.lock().drain(..).collect();
        if !drained.is_empty() {
            self.not_full.notify_waiters();
        }
        drained
    }

    /// Refuse further pushes and wake all waiters.
    pub fn close(&self) {
        {
            let _items = self.items.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    async fn wait_for<F>(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        mut attempt: F,
    ) -> Result<T, PopError>
    where
        F: FnMut() -> Option<T>,
    {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = attempt() {
                return Ok(item);
            }
            if self.is_closed() {
                return Err(PopError::Closed);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PopError::Cancelled),
                _ = sleep_until(deadline) => return Err(PopError::Timeout),
                _ = &mut notified => {}
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
