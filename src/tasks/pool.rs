//! Bounded background task pool.
//!
//! # Responsibilities
//! - Run caller-submitted jobs off the request path
//! - Bound concurrency (fixed worker count) and memory (fixed queue capacity)
//! - Contain job panics so a bad job never costs a worker
//! - Drain on shutdown within a deadline
//!
//! # Design Decisions
//! - `submit` uses `try_send`: a full queue drops the job and reports it,
//!   the caller is never blocked
//! - Workers share one receiver behind an async mutex; the lock is only held
//!   while waiting for the next job, never while running one
//! - Shutdown does not interrupt a running job; queued jobs that have not
//!   started are discarded and counted

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::observability::metrics;

/// A unit of background work. No result, no ordering guarantee.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Why a job was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("task queue is full")]
    QueueFull,
    #[error("task pool is shutting down")]
    Closed,
}

/// Pool lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Uninitialized = 0,
    Running = 1,
    Draining = 2,
    Terminated = 3,
}

impl From<u8> for PoolState {
    fn from(val: u8) -> Self {
        match val {
            1 => PoolState::Running,
            2 => PoolState::Draining,
            3 => PoolState::Terminated,
            _ => PoolState::Uninitialized,
        }
    }
}

/// Result of [`TaskPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every worker exited before the deadline.
    Drained,
    /// The deadline passed with at least one job still running.
    TimedOut,
}

struct PoolInner {
    tx: mpsc::Sender<Job>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    state: AtomicU8,
    cancel: CancellationToken,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    capacity: usize,
}

/// Fixed-size worker pool with a bounded intake queue.
///
/// Cloning is cheap; clones share the same workers and queue.
#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

static GLOBAL: OnceLock<TaskPool> = OnceLock::new();

/// The process-wide pool, started on first call.
///
/// Later calls return the same pool and ignore `config`. Must first be
/// called from within a Tokio runtime.
pub fn global(config: &WorkerConfig) -> TaskPool {
    GLOBAL.get_or_init(|| TaskPool::start(config)).clone()
}

impl TaskPool {
    /// Spawn the workers. Must be called from within a Tokio runtime.
    pub fn start(config: &WorkerConfig) -> Self {
        Self::with_capacity(config.count, config.queue_capacity)
    }

    /// Spawn `workers` loops sharing a queue of `capacity` slots.
    ///
    /// Both values are clamped to at least one.
    pub fn with_capacity(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);

        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        let handles = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, rx.clone(), cancel.clone())))
            .collect();

        tracing::info!(workers, capacity, "Task pool started");

        Self {
            inner: Arc::new(PoolInner {
                tx,
                rx,
                state: AtomicU8::new(PoolState::Running as u8),
                cancel,
                workers: StdMutex::new(handles),
                worker_count: workers,
                capacity,
            }),
        }
    }

    /// Queue a job without waiting.
    ///
    /// Returns `QueueFull` immediately when there is no room; the job is
    /// dropped and never runs.
    pub fn submit<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit_as("anonymous", job)
    }

    /// Like [`submit`](Self::submit), with a label for the drop log.
    pub fn submit_as<F>(&self, label: &'static str, job: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.state() != PoolState::Running {
            tracing::warn!(job = label, "Task pool shutting down, dropping job");
            metrics::record_task_dropped("closed");
            return Err(SubmitError::Closed);
        }

        match self.inner.tx.try_send(Box::pin(job)) {
            Ok(()) => {
                metrics::record_task_submitted();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    job = label,
                    capacity = self.inner.capacity,
                    "Task queue full, dropping job"
                );
                metrics::record_task_dropped("queue_full");
                Err(SubmitError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(job = label, "Task queue closed, dropping job");
                metrics::record_task_dropped("closed");
                Err(SubmitError::Closed)
            }
        }
    }

    /// Stop the workers and wait up to `deadline` for them to exit.
    ///
    /// Running jobs are allowed to finish. If one outlives the deadline the
    /// pool is abandoned in place and `TimedOut` is returned.
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownOutcome {
        let _ = self.inner.state.compare_exchange(
            PoolState::Running as u8,
            PoolState::Draining as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.inner.cancel.cancel();

        let handles = std::mem::take(
            &mut *self
                .inner
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        tracing::info!(
            workers = handles.len(),
            deadline_ms = deadline.as_millis() as u64,
            "Task pool draining"
        );

        let outcome =
            match tokio::time::timeout(deadline, futures_util::future::join_all(handles)).await {
                Ok(results) => {
                    for result in results {
                        if let Err(e) = result {
                            tracing::error!(error = %e, "Task pool worker ended abnormally");
                        }
                    }
                    ShutdownOutcome::Drained
                }
                Err(_) => {
                    tracing::warn!(
                        deadline_ms = deadline.as_millis() as u64,
                        "Task pool shutdown deadline elapsed, forcing shutdown with jobs still running"
                    );
                    ShutdownOutcome::TimedOut
                }
            };

        let discarded = self.discard_pending();
        if discarded > 0 {
            tracing::warn!(discarded, "Discarded queued jobs that never started");
            for _ in 0..discarded {
                metrics::record_task_dropped("shutdown");
            }
        }

        self.inner
            .state
            .store(PoolState::Terminated as u8, Ordering::SeqCst);
        tracing::info!(outcome = ?outcome, "Task pool stopped");
        outcome
    }

    /// Close the queue and drop everything still in it.
    fn discard_pending(&self) -> usize {
        // A worker stuck past the deadline is running a job, not holding
        // the receiver, so this only fails if one is mid-dequeue.
        let Ok(mut rx) = self.inner.rx.try_lock() else {
            return 0;
        };
        rx.close();
        let mut discarded = 0;
        while rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    pub fn state(&self) -> PoolState {
        PoolState::from(self.inner.state.load(Ordering::SeqCst))
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.inner.capacity - self.inner.tx.capacity()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.worker_count
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("state", &self.state())
            .field("workers", &self.inner.worker_count)
            .field("capacity", &self.inner.capacity)
            .field("queued", &self.queued())
            .finish()
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker = id, "Worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = async { rx.lock().await.recv().await } => job,
        };

        let Some(job) = next else { break };

        // Dequeued in the same instant shutdown fired: do not start it.
        if cancel.is_cancelled() {
            metrics::record_task_dropped("shutdown");
            break;
        }

        run_job(id, job).await;
    }

    tracing::debug!(worker = id, "Worker stopped");
}

async fn run_job(worker: usize, job: Job) {
    match AssertUnwindSafe(job).catch_unwind().await {
        Ok(()) => metrics::record_task_completed(),
        Err(panic) => {
            let fault = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            tracing::error!(worker, fault = %fault, "Background job panicked");
            metrics::record_task_faulted();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Instant;
    use tokio::sync::{oneshot, Notify};

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_every_accepted_job_runs_exactly_once() {
        let pool = TaskPool::with_capacity(4, 100);
        let seen = Arc::new(StdMutex::new(Vec::new()));

        for i in 0..50 {
            let seen = seen.clone();
            pool.submit(async move {
                seen.lock().unwrap().push(i);
            })
            .unwrap();
        }

        wait_until(|| seen.lock().unwrap().len() == 50).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut ids = seen.lock().unwrap().clone();
        ids.sort_unstable();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());

        assert_eq!(pool.shutdown(Duration::from_secs(1)).await, ShutdownOutcome::Drained);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let pool = TaskPool::with_capacity(1, 1);

        let (started_tx, started_rx) = oneshot::channel();
        let release = Arc::new(Notify::new());
        let gate = release.clone();
        pool.submit(async move {
            let _ = started_tx.send(());
            gate.notified().await;
        })
        .unwrap();
        started_rx.await.unwrap();

        let queued_ran = Arc::new(AtomicBool::new(false));
        let flag = queued_ran.clone();
        pool.submit(async move { flag.store(true, Ordering::SeqCst) })
            .unwrap();
        assert_eq!(pool.queued(), 1);

        let dropped_ran = Arc::new(AtomicBool::new(false));
        let flag = dropped_ran.clone();
        let start = Instant::now();
        let result = pool.submit(async move { flag.store(true, Ordering::SeqCst) });
        assert_eq!(result, Err(SubmitError::QueueFull));
        assert!(start.elapsed() < Duration::from_millis(50));

        release.notify_one();
        wait_until(|| queued_ran.load(Ordering::SeqCst)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!dropped_ran.load(Ordering::SeqCst));

        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let pool = TaskPool::with_capacity(1, 10);
        let ran = Arc::new(AtomicUsize::new(0));

        pool.submit(async {
            panic!("boom");
        })
        .unwrap();
        for _ in 0..3 {
            let ran = ran.clone();
            pool.submit(async move {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        wait_until(|| ran.load(Ordering::SeqCst) == 3).await;
        assert_eq!(pool.state(), PoolState::Running);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_respects_deadline_with_stuck_job() {
        let pool = TaskPool::with_capacity(2, 10);
        let (started_tx, started_rx) = oneshot::channel();
        pool.submit(async move {
            let _ = started_tx.send(());
            std::future::pending::<()>().await;
        })
        .unwrap();
        started_rx.await.unwrap();

        let start = Instant::now();
        let outcome = pool.shutdown(Duration::from_millis(100)).await;
        assert_eq!(outcome, ShutdownOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.state(), PoolState::Terminated);
    }

    #[tokio::test]
    async fn test_shutdown_lets_running_job_finish() {
        let pool = TaskPool::with_capacity(1, 10);
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = oneshot::channel();

        let flag = finished.clone();
        pool.submit(async move {
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        started_rx.await.unwrap();

        let outcome = pool.shutdown(Duration::from_secs(2)).await;
        assert_eq!(outcome, ShutdownOutcome::Drained);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let pool = TaskPool::with_capacity(2, 4);
        assert_eq!(pool.state(), PoolState::Running);

        pool.shutdown(Duration::from_secs(1)).await;
        assert_eq!(pool.state(), PoolState::Terminated);
        assert_eq!(pool.submit(async {}), Err(SubmitError::Closed));

        // A second shutdown is harmless.
        assert_eq!(pool.shutdown(Duration::from_millis(10)).await, ShutdownOutcome::Drained);
    }

    #[tokio::test]
    async fn test_global_pool_is_started_once() {
        let first = global(&WorkerConfig {
            count: 2,
            queue_capacity: 8,
            shutdown_timeout_secs: 1,
        });
        let second = global(&WorkerConfig {
            count: 16,
            queue_capacity: 1024,
            shutdown_timeout_secs: 1,
        });

        assert!(Arc::ptr_eq(&first.inner, &second.inner));
        assert_eq!(second.worker_count(), 2);
        assert_eq!(second.capacity(), 8);
    }
}
