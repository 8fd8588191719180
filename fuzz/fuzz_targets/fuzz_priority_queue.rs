//! Fuzz target for priority buffer ordering.
//!
//! Any interleaving of pushes, pops and requeues must pop in non-increasing
//! priority order, FIFO among equal priorities.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use worklane::scheduler::{FnJob, PriorityQueue};

#[derive(Debug, Arbitrary)]
enum Op {
    Push(i8),
    Pop,
    PopAndRequeue,
}

fuzz_target!(|ops: Vec<Op>| {
    let queue = PriorityQueue::<()>::new();
    let mut next_id = 0u64;

    for op in ops {
        match op {
            Op::Push(p) => {
                let job = FnJob::new(next_id.to_string(), || async { Ok(()) })
                    .with_priority(i32::from(p))
                    .boxed();
                next_id += 1;
                queue.push(job);
            }
            Op::Pop => {
                let _ = queue.pop();
            }
            Op::PopAndRequeue => {
                if let Some(entry) = queue.pop() {
                    queue.requeue(entry);
                }
            }
        }
    }

    let mut last: Option<(i32, u64)> = None;
    while let Some(entry) = queue.pop() {
        if let Some((priority, sequence)) = last {
            assert!(entry.priority <= priority);
            if entry.priority == priority {
                assert!(entry.sequence > sequence);
            }
        }
        last = Some((entry.priority, entry.sequence));
    }
});
