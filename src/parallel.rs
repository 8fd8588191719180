//! Free-standing concurrency helpers that need no manager.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::scheduler::job::panic_message;

/// Worker count used when a caller passes zero.
pub const DEFAULT_PARALLELISM: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParallelError<E> {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("item {index} failed: {error}")]
    Failed { index: usize, error: E },

    #[error("item {index} panicked: {message}")]
    Panicked { index: usize, message: String },
}

/// Apply `f` to every item with at most `workers` running at once.
///
/// Every item is processed even when one fails; the error returned is the
/// first in input order. Output order matches input order.
pub async fn parallel_map<T, R, E, F, Fut>(
    items: Vec<T>,
    workers: usize,
    f: F,
) -> Result<Vec<R>, ParallelError<E>>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let workers = if workers == 0 {
        DEFAULT_PARALLELISM
    } else {
        workers
    };
    let total = items.len();
    let permits = Arc::new(Semaphore::new(workers));
    let mut set = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let permits = permits.clone();
        let fut = f(item);
        set.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            (index, AssertUnwindSafe(fut).catch_unwind().await)
        });
    }

    let mut slots: Vec<Option<Result<R, ParallelError<E>>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        let Ok((index, outcome)) = joined else {
            continue;
        };
        slots[index] = Some(match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(ParallelError::Failed { index, error }),
            Err(panic) => Err(ParallelError::Panicked {
                index,
                message: panic_message(panic.as_ref()),
            }),
        });
    }

    let mut out = Vec::with_capacity(total);
    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(value)) => out.push(value),
            Some(Err(e)) => return Err(e),
            None => {
                return Err(ParallelError::Panicked {
                    index,
                    message: "task vanished".to_string(),
                })
            }
        }
    }
    Ok(out)
}

/// Await `fut` for at most `timeout`. The future is dropped on expiry.
pub async fn run_with_timeout<T, E, Fut>(fut: Fut, timeout: Duration) -> Result<T, ParallelError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(ParallelError::Failed { index: 0, error }),
        Err(_) => Err(ParallelError::Timeout(timeout)),
    }
}
