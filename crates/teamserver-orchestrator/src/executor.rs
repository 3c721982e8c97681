use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use teamserver_core::{TeamserverError, TeamserverResult};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, warn};

/// A unit of deferred work. May run more than once, so `run` must be
/// idempotent.
#[async_trait]
pub trait DeferredJob: Send + Sync {
    fn describe(&self) -> String;
    async fn run(&self) -> TeamserverResult<()>;
}

/// Accepts deferred work and guarantees eventual, at-least-once execution.
pub trait JobExecutor: Send + Sync {
    /// Enqueue without waiting. Fails if the executor is saturated or closed.
    fn submit(&self, job: Arc<dyn DeferredJob>) -> TeamserverResult<()>;
}

/// Fixed-size pool of tokio workers draining a bounded queue.
///
/// A job that returns `Err` is retried with linear backoff until it
/// succeeds or `max_attempts` is reached.
pub struct WorkerPool {
    tx: mpsc::Sender<Arc<dyn DeferredJob>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current tokio runtime.
    pub fn start(workers: usize, max_attempts: u32, capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Arc<dyn DeferredJob>>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        for worker in 0..workers.max(1) {
            let rx = rx.clone();
            let pending = pending.clone();
            let idle = idle.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    run_with_retries(worker, job.as_ref(), max_attempts.max(1)).await;
                    if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                        idle.notify_waiters();
                    }
                }
                debug!(worker, "Worker stopped");
            });
        }

        Arc::new(Self { tx, pending, idle })
    }

    /// Jobs submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every submitted job has finished (including retries).
    pub async fn flush(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(50 * u64::from(attempt))
}

/// Longest time a job can spend waiting between its first and last attempt.
pub fn retry_span(max_attempts: u32) -> Duration {
    (1..max_attempts).map(backoff).sum()
}

async fn run_with_retries(worker: usize, job: &dyn DeferredJob, max_attempts: u32) {
    for attempt in 1..=max_attempts {
        match job.run().await {
            Ok(()) => {
                debug!(worker, attempt, job = %job.describe(), "Job finished");
                return;
            }
            Err(e) if attempt < max_attempts => {
                warn!(worker, attempt, job = %job.describe(), error = %e, "Job failed, retrying");
                tokio::time::sleep(backoff(attempt)).await;
            }
            Err(e) => {
                error!(worker, attempt, job = %job.describe(), error = %e, "Job failed, giving up");
            }
        }
    }
}

impl JobExecutor for WorkerPool {
    fn submit(&self, job: Arc<dyn DeferredJob>) -> TeamserverResult<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.try_send(job).map_err(|e| {
            if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.idle.notify_waiters();
            }
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    TeamserverError::Executor("job queue is full".into())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    TeamserverError::Executor("worker pool is closed".into())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingJob {
        runs: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl DeferredJob for CountingJob {
        fn describe(&self) -> String {
            "counting".into()
        }

        async fn run(&self) -> TeamserverResult<()> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                Err(TeamserverError::Store("flaky".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_retry_span_sums_backoffs() {
        assert_eq!(retry_span(1), Duration::ZERO);
        assert_eq!(retry_span(3), Duration::from_millis(150));
    }

    fn job(fail_first: u32) -> Arc<CountingJob> {
        Arc::new(CountingJob {
            runs: AtomicU32::new(0),
            fail_first,
        })
    }

    #[tokio::test]
    async fn test_jobs_run_and_flush() {
        let pool = WorkerPool::start(2, 3, 16);
        let jobs: Vec<_> = (0..5).map(|_| job(0)).collect();
        for j in &jobs {
            pool.submit(j.clone()).unwrap();
        }
        pool.flush().await;
        assert_eq!(pool.pending(), 0);
        for j in &jobs {
            assert_eq!(j.runs.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_failed_job_is_retried() {
        let pool = WorkerPool::start(1, 3, 4);
        let j = job(2);
        pool.submit(j.clone()).unwrap();
        pool.flush().await;
        assert_eq!(j.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let pool = WorkerPool::start(1, 2, 4);
        let j = job(10);
        pool.submit(j.clone()).unwrap();
        pool.flush().await;
        assert_eq!(j.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flush_on_idle_pool_returns() {
        let pool = WorkerPool::start(1, 1, 1);
        pool.flush().await;
    }
}
