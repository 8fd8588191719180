//! Job contract and the Result record produced for each executed job.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

/// Failure reported by a job's execute. Carried only inside a [`JobResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("item {index} failed: {message}")]
    ItemFailed { index: usize, message: String },

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("job cancelled before completion")]
    Cancelled,
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Capture any error's message as a job failure.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Text carried by a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A unit of work.
///
/// `execute` may run concurrently with other jobs' `execute` calls, so jobs
/// must not share mutable state unless it is externally synchronized. Pools do
/// not time out `execute`; jobs are expected to finish within whatever budget
/// their producer understands.
#[async_trait]
pub trait Job: Send + Sync {
    type Output: Send + 'static;

    async fn execute(&self) -> Result<Self::Output, JobError>;

    /// Identifier, unique among concurrently in-flight jobs.
    fn id(&self) -> &str;

    /// Higher runs first.
    fn priority(&self) -> i32 {
        0
    }
}

/// Owned, type-erased job producing payload `P`.
pub type BoxedJob<P> = Box<dyn Job<Output = P>>;

/// Outcome of executing one job.
#[derive(Debug)]
pub struct JobResult<P> {
    pub job_id: String,
    pub outcome: Result<P, JobError>,
    pub duration: Duration,
    pub worker_id: usize,
    pub completed_at: DateTime<Utc>,
}

impl<P> JobResult<P> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.outcome.as_ref().err()
    }

    pub fn payload(&self) -> Option<&P> {
        self.outcome.as_ref().ok()
    }

    pub fn into_payload(self) -> Result<P, JobError> {
        self.outcome
    }
}

type JobFn<P> = Box<dyn Fn() -> BoxFuture<'static, Result<P, JobError>> + Send + Sync>;

/// Job built from a closure.
pub struct FnJob<P> {
    id: String,
    priority: i32,
    run: JobFn<P>,
}

impl<P: Send + 'static> FnJob<P> {
    /// Wrap an async closure. The closure is called once per execution.
    pub fn new<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, JobError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            priority: 0,
            run: Box::new(move || f().boxed()),
        }
    }

    /// Wrap a synchronous closure; it runs on the blocking thread pool.
    pub fn blocking<F>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Result<P, JobError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(id, move || {
            let f = Arc::clone(&f);
            async move {
                match tokio::task::spawn_blocking(move || f()).await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(JobError::Panicked(e.to_string())),
                }
            }
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn boxed(self) -> BoxedJob<P> {
        Box::new(self)
    }
}

impl<P> std::fmt::Debug for FnJob<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnJob")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish()
    }
}

#[async_trait]
impl<P: Send + 'static> Job for FnJob<P> {
    type Output = P;

    async fn execute(&self) -> Result<P, JobError> {
        (self.run)().await
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}
