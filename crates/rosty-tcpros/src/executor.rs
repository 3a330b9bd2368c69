//! Callback job execution.
//!
//! Callback dispatch is delegated to a shared executor so slow user code
//! cannot stall the aggregator loop.  Admission may suspend; the caller
//! bounds it and drops the work on timeout.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// One unit of callback work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget job admission.  The future resolves when the job is
/// admitted, not when it has run.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn submit(&self, job: Job);
}

/// Executor with one worker task draining a bounded queue.
///
/// Jobs run strictly in admission order, which is what preserves
/// per-connection callback ordering downstream.
pub struct WorkerExecutor {
    queue: mpsc::Sender<Job>,
}

impl WorkerExecutor {
    /// Spawn the worker; `capacity` bounds the admission queue.
    pub fn start(capacity: usize) -> WorkerExecutor {
        let (queue, mut jobs) = mpsc::channel::<Job>(capacity);
        tokio::spawn(async move {
            while let Some(job) = jobs.recv().await {
                job();
            }
            debug!("worker executor drained");
        });
        WorkerExecutor { queue }
    }
}

#[async_trait]
impl JobExecutor for WorkerExecutor {
    async fn submit(&self, job: Job) {
        let _ = self.queue.send(job).await;
    }
}
