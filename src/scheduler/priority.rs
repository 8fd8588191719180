//! Job prioritization.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use parking_lot::Mutex;

use super::job::BoxedJob;

/// Well-known priority bands. Any `i32` is a valid priority; higher runs first.
pub mod levels {
    pub const LOW: i32 = 1;
    pub const BACKGROUND: i32 = 3;
    pub const NORMAL: i32 = 5;
    pub const EVENT: i32 = 7;
    pub const HIGH: i32 = 10;
}

/// Queued job with its priority snapshot.
///
/// The priority is read once, at enqueue time, and never re-read.
pub struct PriorityEntry<P> {
    pub job: BoxedJob<P>,
    pub priority: i32,
    pub sequence: u64,
    pub enqueued_at: Instant,
}

impl<P: Send + 'static> std::fmt::Debug for PriorityEntry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityEntry")
            .field("job_id", &self.job.id())
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl<P> PartialEq for PriorityEntry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<P> Eq for PriorityEntry<P> {}

impl<P> PartialOrd for PriorityEntry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for PriorityEntry<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence), // Lower sequence = earlier
            ord => ord,
        }
    }
}

struct Inner<P> {
    heap: BinaryHeap<PriorityEntry<P>>,
    next_sequence: u64,
}

/// Mutex-guarded priority buffer of pending jobs.
///
/// Pops are non-increasing by priority and FIFO among equal priorities.
/// The lock is private to the queue and never held across a pool call.
pub struct PriorityQueue<P> {
    inner: Mutex<Inner<P>>,
}

impl<P: Send + 'static> PriorityQueue<P> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_sequence: 0,
            }),
        }
    }

    /// Enqueue a job, snapshotting its priority.
    pub fn push(&self, job: BoxedJob<P>) {
        let priority = job.priority();
        let mut inner = self.inner.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.heap.push(PriorityEntry {
            job,
            priority,
            sequence,
            enqueued_at: Instant::now(),
        });
    }

    /// Put a popped entry back at its original position.
    pub fn requeue(&self, entry: PriorityEntry<P>) {
        self.inner.lock().heap.push(entry);
    }

    pub fn pop(&self) -> Option<PriorityEntry<P>> {
        self.inner.lock().heap.pop()
    }

    /// Priority of the entry `pop` would return.
    pub fn peek_priority(&self) -> Option<i32> {
        self.inner.lock().heap.peek().map(|e| e.priority)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Remove and return all entries in pop order.
    pub fn drain(&self) -> Vec<PriorityEntry<P>> {
        let heap = std::mem::take(&mut self.inner.lock().heap);
        heap.into_sorted_vec().into_iter().rev().collect()
    }
}

impl<P: Send + 'static> Default for PriorityQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::FnJob;

    fn job(id: &str, priority: i32) -> BoxedJob<()> {
        FnJob::new(id, || async { Ok(()) }).with_priority(priority).boxed()
    }

    fn pop_ids(q: &PriorityQueue<()>) -> Vec<String> {
        std::iter::from_fn(|| q.pop().map(|e| e.job.id().to_string())).collect()
    }

    #[test]
    fn ties_preserve_insertion_order() {
        let q = PriorityQueue::new();
        q.push(job("three", 3));
        q.push(job("seven-a", 7));
        q.push(job("seven-b", 7));
        q.push(job("one", 1));

        assert_eq!(pop_ids(&q), vec!["seven-a", "seven-b", "three", "one"]);
    }

    #[test]
    fn requeue_restores_original_position() {
        let q = PriorityQueue::new();
        q.push(job("a", 5));
        q.push(job("b", 5));
        q.push(job("c", 5));

        let first = q.pop().unwrap();
        assert_eq!(first.job.id(), "a");
        q.requeue(first);

        assert_eq!(pop_ids(&q), vec!["a", "b", "c"]);
    }

    #[test]
    fn negative_priorities_sort_last() {
        let q = PriorityQueue::new();
        q.push(job("neg", -4));
        q.push(job("zero", 0));
        assert_eq!(q.peek_priority(), Some(0));
        assert_eq!(pop_ids(&q), vec!["zero", "neg"]);
    }

    #[test]
    fn drain_returns_pop_order() {
        let q = PriorityQueue::new();
        q.push(job("low", 1));
        q.push(job("high", 9));
        q.push(job("mid", 5));

        let drained: Vec<_> = q.drain().into_iter().map(|e| e.job.id().to_string()).collect();
        assert_eq!(drained, vec!["high", "mid", "low"]);
        assert!(q.is_empty());
    }

    fn front_summary<P: Send + 'static>(q: &PriorityQueue<P>) -> Option<String> {
        let entry = q.pop()?;
        let shown = format!("{entry:?}");
        q.requeue(entry);
        Some(shown)
    }

    #[test]
    fn works_for_any_sendable_payload() {
        let q: PriorityQueue<String> = PriorityQueue::default();
        assert_eq!(front_summary(&q), None);
        q.push(FnJob::new("text", || async { Ok("done".to_string()) }).with_priority(2).boxed());

        let shown = front_summary(&q).unwrap();
        assert!(shown.contains("text") && shown.contains("priority: 2"), "{shown}");
        assert_eq!(q.size(), 1);
    }
}
