//! Partitioned parallel helpers built on the main lane.
//!
//! Each helper wraps caller work in jobs whose payload is `P::default()`;
//! the real values travel back over a per-job oneshot channel, so the lane
//! stays payload-agnostic.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ConcurrentManager, ManagerError};
use crate::scheduler::{levels, BoxedJob, Job, JobError, PoolError};

/// One-shot job that forwards its value to a side channel.
struct SideJob<P, O> {
    id: String,
    priority: i32,
    work: Mutex<Option<BoxFuture<'static, Result<O, JobError>>>>,
    reply: Mutex<Option<oneshot::Sender<O>>>,
    _payload: PhantomData<fn() -> P>,
}

impl<P, O> SideJob<P, O>
where
    P: Default + Send + 'static,
    O: Send + 'static,
{
    fn new<Fut>(id: String, priority: i32, work: Fut, reply: Option<oneshot::Sender<O>>) -> Self
    where
        Fut: Future<Output = Result<O, JobError>> + Send + 'static,
    {
        Self {
            id,
            priority,
            work: Mutex::new(Some(work.boxed())),
            reply: Mutex::new(reply),
            _payload: PhantomData,
        }
    }

    fn boxed(self) -> BoxedJob<P> {
        Box::new(self)
    }
}

#[async_trait]
impl<P, O> Job for SideJob<P, O>
where
    P: Default + Send + 'static,
    O: Send + 'static,
{
    type Output = P;

    async fn execute(&self) -> Result<P, JobError> {
        let work = self.work.lock().take();
        let Some(work) = work else {
            return Err(JobError::failed(format!("job {} already executed", self.id)));
        };
        let value = work.await?;
        let reply = self.reply.lock().take();
        if let Some(reply) = reply {
            // The caller may have given up; the value is simply dropped.
            let _ = reply.send(value);
        }
        Ok(P::default())
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

fn run_tag() -> String {
    let mut tag = Uuid::new_v4().simple().to_string();
    tag.truncate(12);
    tag
}

impl<P: Default + Send + 'static> ConcurrentManager<P> {
    /// Apply `f` to every item, `chunk_size` items per job, and return the
    /// outputs in input order.
    ///
    /// The first item failure (in input order) fails the whole call with
    /// [`JobError::ItemFailed`]. `chunk_size == 0` uses the configured batch
    /// size. `f` runs on a lane worker, so it should be cheap.
    pub async fn map_in_chunks<T, R, F>(
        &self,
        items: Vec<T>,
        chunk_size: usize,
        f: F,
    ) -> Result<Vec<R>, ManagerError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Result<R, JobError> + Send + Sync + 'static,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let size = if chunk_size == 0 {
            self.config.batch_size
        } else {
            chunk_size
        };
        let total = items.len();
        let f = std::sync::Arc::new(f);
        let tag = run_tag();

        let mut jobs = Vec::new();
        let mut replies = Vec::new();
        let mut indexed = items.into_iter().enumerate();
        loop {
            let chunk: Vec<(usize, T)> = indexed.by_ref().take(size).collect();
            if chunk.is_empty() {
                break;
            }
            let f = f.clone();
            let (tx, rx) = oneshot::channel();
            let work = async move {
                let mut out = Vec::with_capacity(chunk.len());
                for (index, item) in chunk {
                    match f(item) {
                        Ok(value) => out.push(value),
                        Err(e) => {
                            return Err(JobError::ItemFailed {
                                index,
                                message: e.to_string(),
                            })
                        }
                    }
                }
                Ok(out)
            };
            let id = format!("chunk-{tag}-{}", replies.len());
            jobs.push(SideJob::<P, Vec<R>>::new(id, levels::NORMAL, work, Some(tx)).boxed());
            replies.push(rx);
        }

        debug!(items = total, chunks = jobs.len(), "mapping in chunks");
        self.run_waves(jobs).await?;

        let mut out = Vec::with_capacity(total);
        for mut rx in replies {
            match rx.try_recv() {
                Ok(values) => out.extend(values),
                Err(_) => return Err(ManagerError::Job(JobError::Cancelled)),
            }
        }
        Ok(out)
    }

    /// Run `f` once per keyed item through the throttled main lane and
    /// collect one value per key.
    ///
    /// Fails fast on the first refused submission, the first job failure,
    /// or when `timeout` passes with keys still missing. Outstanding results
    /// are discarded in every failure case.
    pub async fn process_keyed<K, T, R, F, Fut>(
        &self,
        items: Vec<(K, T)>,
        f: F,
        timeout: Duration,
    ) -> Result<HashMap<K, R>, ManagerError>
    where
        K: Eq + Hash + Send + 'static,
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, JobError>> + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let tag = run_tag();
        let main = &self.lanes.main;
        let mut pending: HashMap<String, (K, oneshot::Receiver<R>)> =
            HashMap::with_capacity(items.len());

        for (index, (key, item)) in items.into_iter().enumerate() {
            let id = format!("keyed-{tag}-{index}");
            let (tx, rx) = oneshot::channel();
            let job = SideJob::<P, R>::new(id.clone(), levels::NORMAL, f(item), Some(tx));
            if let Err(e) = self.submit_job(job.boxed()) {
                warn!(error = %e, submitted = pending.len(), "keyed submission refused");
                main.discard_results(pending.keys());
                return Err(e);
            }
            pending.insert(id, (key, rx));
        }

        let mut out = HashMap::with_capacity(pending.len());
        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.abandon_keyed(&pending));
            }
            let next = main
                .get_result_matching(|r| pending.contains_key(&r.job_id), remaining)
                .await;
            let result = match next {
                Ok(result) => result,
                Err(PoolError::ResultTimeout(_)) => return Err(self.abandon_keyed(&pending)),
                Err(e) => {
                    main.discard_results(pending.keys());
                    return Err(e.into());
                }
            };
            let Some((key, mut rx)) = pending.remove(&result.job_id) else {
                continue;
            };
            if let Err(e) = result.into_payload() {
                main.discard_results(pending.keys());
                return Err(e.into());
            }
            match rx.try_recv() {
                Ok(value) => {
                    out.insert(key, value);
                }
                Err(_) => {
                    main.discard_results(pending.keys());
                    return Err(ManagerError::Job(JobError::Cancelled));
                }
            }
        }
        Ok(out)
    }

    /// One high-priority job per event, awaited as a batch. Returns the
    /// first handler error in event order.
    pub async fn dispatch_events<E, F, Fut>(
        &self,
        events: Vec<E>,
        handler: F,
    ) -> Result<(), ManagerError>
    where
        E: Send + 'static,
        F: Fn(E) -> Fut,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let tag = run_tag();
        let jobs = events
            .into_iter()
            .enumerate()
            .map(|(i, event)| {
                SideJob::<P, ()>::new(format!("event-{tag}-{i}"), levels::EVENT, handler(event), None)
                    .boxed()
            })
            .collect();
        self.run_waves(jobs).await
    }

    /// Batch `jobs` through the main lane, at most one queue's worth at a
    /// time, surfacing the first job failure.
    async fn run_waves(&self, mut jobs: Vec<BoxedJob<P>>) -> Result<(), ManagerError> {
        let wave = self.lanes.main.queue_capacity().max(1);
        while !jobs.is_empty() {
            let rest = jobs.split_off(jobs.len().min(wave));
            let current = std::mem::replace(&mut jobs, rest);
            let results = self.process_batch(current).await?;
            if let Some(err) = results.into_iter().find_map(|r| r.into_payload().err()) {
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn abandon_keyed<K, R>(&self, pending: &HashMap<String, (K, oneshot::Receiver<R>)>) -> ManagerError {
        warn!(missing = pending.len(), "keyed results missed the deadline");
        self.lanes.main.discard_results(pending.keys());
        ManagerError::KeyedTimeout {
            missing: pending.len(),
        }
    }
}
