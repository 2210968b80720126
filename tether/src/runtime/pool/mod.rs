//! # Worker Thread Pool
//!
//! A fixed set of OS threads draining one shared FIFO of deferred tasks.
//!
//! ## Key Concepts
//! - Global FIFO: tasks start in the order they were enqueued, across all
//!   producer threads, because a single mutex guards the queue
//! - Re-entrancy: `defer` may be called from inside a running task
//! - Stop: once stopped, no queued task runs; leftovers are discarded
//!
//! ## Lifecycle
//! 1. `ThreadPool::new` spawns `pool_size` named workers
//! 2. Workers run tasks until `stop()`
//! 3. `join()` (or drop) stops the pool and joins every worker

mod queue;
mod worker;

pub use queue::{QueueSnapshot, TaskId};
pub use worker::{current_task_id, on_worker_thread};
pub(crate) use worker::unwind_stopped;
pub(crate) use worker::current_pool_id;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tether_api::errors::RuntimeError;
use tether_api::types::{BoxedTask, RuntimeResult, TaskResult};
use tracing::debug;

use crate::log_lifecycle;
use crate::logging;
use crate::runtime::config::RuntimeConfig;
use queue::TaskQueue;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Counters describing a pool at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMetrics {
    pub pool_size: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub executed: u64,
    pub discarded: u64,
    pub stopped: bool,
}

/// State shared between the pool handle and its workers.
pub(crate) struct PoolShared {
    pub(crate) id: u64,
    pub(crate) queue: TaskQueue,
    pub(crate) config: RuntimeConfig,
    pub(crate) dispatch: tracing::Dispatch,
    failure: Mutex<Option<String>>,
}

impl PoolShared {
    pub(crate) fn stop(&self) {
        let abandoned = self.queue.stop();
        if !abandoned.is_empty() {
            debug!(pool = self.id, count = abandoned.len(), "discarding tasks queued at stop");
        }
        drop(abandoned);
    }

    pub(crate) fn record_failure(&self, failure: String) {
        let mut slot = self.failure.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.get_or_insert(failure);
    }

    fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Fixed-size pool of worker threads sharing one task queue.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("id", &self.shared.id)
            .field("pool_size", &self.shared.config.pool_size)
            .field("stopped", &self.shared.queue.is_stopped())
            .finish()
    }
}

impl ThreadPool {
    /// Creates a pool and starts its workers.
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        let config = config.normalized();
        let shared = Arc::new(PoolShared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            queue: TaskQueue::new(),
            config,
            dispatch: logging::current_subscriber(),
            failure: Mutex::new(None),
        });

        let pool = Self {
            shared: shared.clone(),
            workers: Mutex::new(Vec::with_capacity(shared.config.pool_size)),
        };

        for index in 0..shared.config.pool_size {
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", shared.config.thread_name_prefix, index))
                .spawn(move || worker::run_worker(worker_shared, index));
            match spawned {
                Ok(handle) => pool.lock_workers().push(handle),
                Err(e) => {
                    pool.join();
                    return Err(RuntimeError::ThreadSetup(format!(
                        "failed to spawn worker {index}: {e}"
                    )));
                }
            }
        }

        log_lifecycle!("pool", shared.id, "started", pool_size = shared.config.pool_size);
        Ok(pool)
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn pool_size(&self) -> usize {
        self.shared.config.pool_size
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Enqueues an infallible task. Callable from any thread, including the
    /// pool's own workers.
    pub fn defer<F>(&self, task: F) -> RuntimeResult<TaskId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.defer_boxed(Box::new(move || {
            task();
            Ok(())
        }))
    }

    /// Enqueues a task whose `Err` is treated as a task failure.
    pub fn defer_fallible<F>(&self, task: F) -> RuntimeResult<TaskId>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.defer_boxed(Box::new(task))
    }

    pub fn defer_boxed(&self, task: BoxedTask) -> RuntimeResult<TaskId> {
        self.shared.queue.push(task)
    }

    /// Stops the pool. Idempotent; queued tasks are discarded.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.queue.is_stopped()
    }

    /// Blocks until the queue has drained and no task is running, or the
    /// pool is stopped. Best effort: work may be added right after.
    ///
    /// Called from one of this pool's workers, the caller's own task is not
    /// waited for, nor are other tasks blocked in `wait_all` at the same time.
    pub fn wait_all(&self) {
        self.shared.queue.wait_idle(self.is_current_worker());
    }

    /// Blocks until the pool is stopped.
    pub fn wait_stopped(&self) {
        self.shared.queue.wait_stopped();
    }

    /// Whether the calling thread is one of this pool's workers.
    pub fn is_current_worker(&self) -> bool {
        worker::is_worker_of(self.shared.id)
    }

    /// Runs one queued task inline on the calling worker thread. Returns
    /// `false` when nothing ran, including when the caller is not a worker
    /// of this pool.
    pub fn run_pending_one(&self) -> bool {
        if !self.is_current_worker() {
            return false;
        }
        match self.shared.queue.try_pop() {
            Some(queued) => {
                worker::execute(&self.shared, queued);
                true
            }
            None => false,
        }
    }

    /// Failure recorded by the `Stop` policy, if a task failed.
    pub fn failure(&self) -> Option<String> {
        self.shared.failure()
    }

    pub fn metrics(&self) -> PoolMetrics {
        let snapshot = self.shared.queue.snapshot();
        PoolMetrics {
            pool_size: self.shared.config.pool_size,
            queued: snapshot.queued,
            in_flight: snapshot.in_flight,
            executed: snapshot.executed,
            discarded: snapshot.discarded,
            stopped: snapshot.stopped,
        }
    }

    /// Stops the pool and joins every worker. A worker never joins itself;
    /// its handle is detached instead.
    pub fn join(&self) {
        self.stop();
        let handles: Vec<JoinHandle<()>> = self.lock_workers().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!(pool = self.shared.id, "worker thread panicked outside a task");
            }
        }
        log_lifecycle!("pool", self.shared.id, "joined");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    fn small_pool(size: usize) -> ThreadPool {
        ThreadPool::new(RuntimeConfig::default().with_pool_size(size)).unwrap()
    }

    #[test]
    fn zero_sized_pool_gets_one_worker() {
        let pool = small_pool(0);
        assert_eq!(pool.pool_size(), 1);
    }

    #[test]
    fn workers_are_named_with_prefix() {
        let config = RuntimeConfig::default()
            .with_pool_size(1)
            .with_thread_name_prefix("unit-pool");
        let pool = ThreadPool::new(config).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.defer(move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        })
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("unit-pool-0"));
    }

    #[test]
    fn defer_from_inside_a_task() {
        let pool = Arc::new(small_pool(1));
        let (tx, rx) = mpsc::channel();
        let inner_pool = pool.clone();
        pool.defer(move || {
            inner_pool
                .defer(move || tx.send("nested").unwrap())
                .unwrap();
        })
        .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "nested");
    }

    #[test]
    fn run_pending_one_requires_worker_thread() {
        let pool = small_pool(1);
        assert!(!pool.run_pending_one());
    }

    #[test]
    fn failing_task_stops_pool_and_records_failure() {
        let pool = small_pool(1);
        pool.defer_fallible(|| Err(anyhow::anyhow!("boom"))).unwrap();
        pool.wait_stopped();
        assert!(pool.is_stopped());
        let failure = pool.failure().unwrap();
        assert!(failure.contains("boom"));
    }

    #[test]
    fn panicking_task_is_reported() {
        let pool = small_pool(1);
        pool.defer(|| panic!("task exploded")).unwrap();
        pool.wait_stopped();
        assert!(pool.failure().unwrap().contains("task exploded"));
    }

    #[test]
    fn metrics_count_executed_tasks() {
        let pool = small_pool(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.defer(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait_all();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        let metrics = pool.metrics();
        assert_eq!(metrics.executed, 10);
        assert_eq!(metrics.queued, 0);
        assert!(!metrics.stopped);
    }
}
