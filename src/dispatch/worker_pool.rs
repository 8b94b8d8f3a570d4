//! Bounded background worker pool for telemetry jobs.
//!
//! Jobs are boxed futures queued on a bounded channel and executed by a fixed
//! number of tokio tasks spawned on the runtime that was current when the pool
//! started. Submission never blocks: a full queue or a pool that has begun
//! shutting down drops the job.

use crate::error::{EvaluationError, Result};
use futures::future::{BoxFuture, FutureExt};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A unit of telemetry work
pub struct TelemetryJob {
    label: &'static str,
    future: BoxFuture<'static, ()>,
}

impl TelemetryJob {
    pub fn new(label: &'static str, future: BoxFuture<'static, ()>) -> Self {
        Self { label, future }
    }
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<TelemetryJob>>>;

/// Fixed-size pool of tokio workers draining a bounded job queue.
///
/// # Examples
///
/// ```ignore
/// let pool = WorkerPool::start(4, 1024)?;
/// pool.submit("log", async move { sink.record(&entry).await.ok(); }.boxed());
/// pool.shutdown(Duration::from_secs(5)).await;
/// ```
pub struct WorkerPool {
    sender: RwLock<Option<mpsc::Sender<TelemetryJob>>>,
    accepting: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    pool_size: usize,
}

impl WorkerPool {
    /// Spawn `pool_size` workers on the current tokio runtime.
    ///
    /// Fails with a configuration error when called outside a runtime.
    pub fn start(pool_size: usize, queue_capacity: usize) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| {
            EvaluationError::ConfigError(
                "telemetry worker pool must be started inside a tokio runtime".to_string(),
            )
        })?;

        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));

        let workers = (0..pool_size)
            .map(|worker_id| {
                handle.spawn(Self::worker_loop(worker_id, receiver.clone(), pending.clone()))
            })
            .collect();

        info!(pool_size, queue_capacity, "Telemetry worker pool started");

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            accepting: AtomicBool::new(true),
            workers: Mutex::new(workers),
            pending,
            pool_size,
        })
    }

    /// Queue a batch of jobs without blocking, all or none.
    ///
    /// Queue slots for the whole batch are reserved under the same guard that
    /// checks `accepting`, so a concurrent shutdown or a full queue drops the
    /// batch as a unit. Returns false when the batch was dropped.
    pub fn submit_all(&self, jobs: Vec<TelemetryJob>) -> bool {
        if jobs.is_empty() {
            return true;
        }
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);

        if !self.accepting.load(Ordering::SeqCst) {
            debug!(jobs = jobs.len(), "Worker pool shut down, skipping jobs");
            return false;
        }
        let Some(sender) = guard.as_ref() else {
            return false;
        };

        let permits = match sender.try_reserve_many(jobs.len()) {
            Ok(permits) => permits,
            Err(TrySendError::Full(())) => {
                warn!(jobs = jobs.len(), "Telemetry queue full, dropping jobs");
                return false;
            }
            Err(TrySendError::Closed(())) => return false,
        };

        self.pending.fetch_add(jobs.len(), Ordering::SeqCst);
        for (permit, job) in permits.zip(jobs) {
            permit.send(job);
        }
        true
    }

    /// Queue a job without blocking.
    ///
    /// Returns false when the job was dropped because the pool no longer
    /// accepts work or the queue is full.
    pub fn submit(&self, label: &'static str, future: BoxFuture<'static, ()>) -> bool {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);

        // Checked under the lock that shutdown takes exclusively
        if !self.accepting.load(Ordering::SeqCst) {
            debug!(job = label, "Worker pool shut down, skipping job");
            return false;
        }
        let Some(sender) = guard.as_ref() else {
            return false;
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(TelemetryJob::new(label, future)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                warn!(job = label, "Telemetry queue full, dropping job");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                false
            }
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Wait until no jobs are queued or running.
    ///
    /// # Returns
    ///
    /// `true` if the pool went idle, `false` if the timeout was reached
    pub async fn wait_for_idle(&self, timeout: Option<Duration>) -> bool {
        let start = tokio::time::Instant::now();

        loop {
            if self.pending() == 0 {
                return true;
            }

            if let Some(timeout_duration) = timeout {
                if start.elapsed() > timeout_duration {
                    return false;
                }
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop accepting work and drain the queue.
    ///
    /// Work still queued after `drain_timeout` is abandoned. Returns true if the
    /// queue drained in time; a second call returns true immediately.
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return true;
        }

        debug!("Stopping telemetry worker pool");
        // Dropping the only sender lets workers exit once the queue is empty
        self.sender.write().unwrap_or_else(PoisonError::into_inner).take();

        let workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let abort_handles: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();

        match tokio::time::timeout(drain_timeout, futures::future::join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("Telemetry worker ended abnormally: {}", e);
                    }
                }
                info!("Telemetry worker pool drained");
                true
            }
            Err(_) => {
                for handle in abort_handles {
                    handle.abort();
                }
                warn!(
                    abandoned = self.pending(),
                    "Telemetry drain timed out, abandoning remaining jobs"
                );
                false
            }
        }
    }

    async fn worker_loop(worker_id: usize, receiver: SharedReceiver, pending: Arc<AtomicUsize>) {
        loop {
            let job = {
                let mut receiver = receiver.lock().await;
                receiver.recv().await
            };

            let Some(TelemetryJob { label, future }) = job else {
                break;
            };

            if AssertUnwindSafe(future).catch_unwind().await.is_err() {
                warn!(worker_id, job = label, "Telemetry job panicked");
            }
            pending.fetch_sub(1, Ordering::SeqCst);
        }

        debug!(worker_id, "Telemetry worker exiting");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.accepting.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_job(counter: &Arc<AtomicUsize>) -> BoxFuture<'static, ()> {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let result = WorkerPool::start(2, 8);
        assert!(matches!(result, Err(EvaluationError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_jobs_run() {
        let pool = WorkerPool::start(2, 16).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            assert!(pool.submit("count", counting_job(&counter)));
        }

        assert!(pool.wait_for_idle(Some(Duration::from_secs(2))).await);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(pool.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_skipped() {
        let pool = WorkerPool::start(1, 4).unwrap();
        assert!(pool.shutdown(Duration::from_secs(1)).await);

        let counter = Arc::new(AtomicUsize::new(0));
        assert!(!pool.submit("late", counting_job(&counter)));
        assert!(!pool.is_accepting());
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_noop() {
        let pool = WorkerPool::start(1, 4).unwrap();
        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(pool.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_jobs() {
        let pool = WorkerPool::start(1, 16).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let counter = counter.clone();
            pool.submit(
                "slow",
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                .boxed(),
            );
        }

        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_drain_timeout_abandons_work() {
        let pool = WorkerPool::start(1, 4).unwrap();
        pool.submit(
            "stuck",
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            .boxed(),
        );

        assert!(!pool.shutdown(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_full_queue_drops_job() {
        let pool = WorkerPool::start(1, 1).unwrap();
        let gate = Arc::new(tokio::sync::Notify::new());

        let blocker = gate.clone();
        pool.submit("block", async move { blocker.notified().await }.boxed());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let counter = Arc::new(AtomicUsize::new(0));
        assert!(pool.submit("queued", counting_job(&counter)));
        assert!(!pool.submit("overflow", counting_job(&counter)));

        gate.notify_one();
        assert!(pool.wait_for_idle(Some(Duration::from_secs(2))).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_all_runs_every_job() {
        let pool = WorkerPool::start(2, 8).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let jobs = (0..3)
            .map(|_| TelemetryJob::new("count", counting_job(&counter)))
            .collect();
        assert!(pool.submit_all(jobs));
        assert!(pool.submit_all(Vec::new()));

        assert!(pool.wait_for_idle(Some(Duration::from_secs(2))).await);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_submit_all_is_all_or_nothing_when_full() {
        let pool = WorkerPool::start(1, 2).unwrap();
        let gate = Arc::new(tokio::sync::Notify::new());

        let blocker = gate.clone();
        pool.submit("block", async move { blocker.notified().await }.boxed());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let counter = Arc::new(AtomicUsize::new(0));
        let jobs = (0..3)
            .map(|_| TelemetryJob::new("count", counting_job(&counter)))
            .collect();
        assert!(!pool.submit_all(jobs));
        assert_eq!(pool.pending(), 1);

        gate.notify_one();
        assert!(pool.wait_for_idle(Some(Duration::from_secs(2))).await);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_all_after_shutdown_is_skipped() {
        let pool = WorkerPool::start(1, 4).unwrap();
        assert!(pool.shutdown(Duration::from_secs(1)).await);

        let counter = Arc::new(AtomicUsize::new(0));
        let jobs = vec![TelemetryJob::new("late", counting_job(&counter))];
        assert!(!pool.submit_all(jobs));
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::start(1, 4).unwrap();
        pool.submit("panics", async { panic!("sink exploded") }.boxed());

        let counter = Arc::new(AtomicUsize::new(0));
        pool.submit("after", counting_job(&counter));

        assert!(pool.wait_for_idle(Some(Duration::from_secs(2))).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
