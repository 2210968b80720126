//! # Event Loop
//!
//! The event loop owns one [`ThreadPool`] and defines where promise
//! continuations run: every continuation, every resumption of an awaiting
//! future, and every dispatched completion passes through the pool's queue.
//! No single thread is "the loop thread"; the loop is the queue.
//!
//! ## Current Loop
//! A loop becomes current on the thread that constructs it and on each of
//! its workers. Only one loop may be current per thread: constructing a
//! second one while the first is alive fails with
//! `RuntimeError::LoopAlreadyRunning`. Code that can take a [`LoopHandle`]
//! explicitly should do so; [`EventLoop::current`] exists for callback
//! boundaries that have no other way to find the loop.
//!
//! ## Usage Example
//!
//! ```rust
//! use tether::runtime::{EventLoop, RuntimeConfig};
//!
//! let event_loop = EventLoop::with_config(RuntimeConfig::default().with_pool_size(2)).unwrap();
//! let answer = event_loop.eval(|| 6 * 7);
//! event_loop.stop_after(&answer);
//! assert_eq!(event_loop.exec().unwrap(), 0);
//! assert_eq!(answer.peek(), Some(42));
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use lazy_static::lazy_static;
use tether_api::errors::RuntimeError;
use tether_api::types::{ExitCode, RuntimeResult, TaskResult};
use tracing::debug;
use uuid::Uuid;

use crate::runtime::config::RuntimeConfig;
use crate::runtime::pool::{self, PoolMetrics, TaskId, ThreadPool};
use crate::runtime::promise::{self, Promise};
use crate::{log_error, log_lifecycle, loop_span};

lazy_static! {
    /// Loops by pool id, so worker threads can find the loop that owns them.
    static ref LOOPS_BY_POOL: Mutex<HashMap<u64, Weak<LoopShared>>> = Mutex::new(HashMap::new());
}

thread_local! {
    /// Loop constructed on this thread, if any.
    static CURRENT: RefCell<Option<Weak<LoopShared>>> = const { RefCell::new(None) };
}

pub(crate) struct LoopShared {
    id: Uuid,
    pool: ThreadPool,
    exit_code: Mutex<Option<ExitCode>>,
}

/// Cloneable, thread-safe handle to an event loop. This is the execution
/// context passed to everything that defers work.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("id", &self.shared.id)
            .field("pool", &self.shared.pool)
            .finish()
    }
}

impl LoopHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.shared.pool
    }

    /// Whether both handles refer to the same loop.
    pub fn same_loop(&self, other: &LoopHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Queues `task` on the loop.
    pub fn defer<F>(&self, task: F) -> RuntimeResult<TaskId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.pool.defer(task)
    }

    /// Queues a task whose `Err` is fatal to the loop.
    pub fn defer_fallible<F>(&self, task: F) -> RuntimeResult<TaskId>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.shared.pool.defer_fallible(task)
    }

    /// Runs `f` on a worker and resolves the returned promise with its
    /// result. The resolution is queued as a separate task, so continuations
    /// never run inline in the worker that computed the value.
    ///
    /// On a stopped loop the returned promise never resolves; use
    /// [`try_eval`](Self::try_eval) to find out.
    pub fn eval<F, R>(&self, f: F) -> Promise<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Clone + Send + 'static,
    {
        let promise = Promise::new(self);
        if let Err(e) = self.submit_eval(promise.clone(), f) {
            debug!(error = %e, "eval submitted to a stopped loop");
        }
        promise
    }

    /// Like [`eval`](Self::eval), but fails with `RuntimeError::Stopped`
    /// when the loop no longer accepts tasks.
    pub fn try_eval<F, R>(&self, f: F) -> RuntimeResult<Promise<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Clone + Send + 'static,
    {
        let promise = Promise::new(self);
        self.submit_eval(promise.clone(), f)?;
        Ok(promise)
    }

    fn submit_eval<F, R>(&self, out: Promise<R>, f: F) -> RuntimeResult<TaskId>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Clone + Send + 'static,
    {
        let handle = self.clone();
        self.defer(move || {
            let value = f();
            if let Err(e) = handle.defer(move || out.resolve(value)) {
                debug!(error = %e, "loop stopped before eval result could be delivered");
            }
        })
    }

    /// Drives `future` on the loop; every poll is a queued task.
    pub fn spawn<F, T>(&self, future: F) -> Promise<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Clone + Send + 'static,
    {
        promise::spawn_on(self, future)
    }

    /// An unresolved promise bound to this loop.
    pub fn promise<T>(&self) -> Promise<T>
    where
        T: Clone + Send + 'static,
    {
        Promise::new(self)
    }

    /// A promise already resolved with `value`.
    pub fn resolved<T>(&self, value: T) -> Promise<T>
    where
        T: Clone + Send + 'static,
    {
        Promise::resolved(self, value)
    }

    /// A promise resolved on the loop once `duration` has elapsed.
    pub fn sleep(&self, duration: Duration) -> Promise<()> {
        let promise = Promise::new(self);
        let out = promise.clone();
        let handle = self.clone();
        let spawned = thread::Builder::new()
            .name("tether-timer".to_string())
            .spawn(move || {
                thread::sleep(duration);
                if let Err(e) = handle.defer(move || out.resolve(())) {
                    debug!(error = %e, "loop stopped before sleep elapsed");
                }
            });
        if let Err(e) = spawned {
            log_error!(e, operation = "sleep");
            let out = promise.clone();
            if let Err(e) = self.defer(move || out.resolve(())) {
                debug!(error = %e, "loop stopped before sleep could resolve");
            }
        }
        promise
    }

    /// Stops the loop once `promise` resolves; `exec()` then returns 0.
    pub fn stop_after<T>(&self, promise: &Promise<T>)
    where
        T: Clone + Send + 'static,
    {
        let handle = self.clone();
        promise.on_resolved(move |_| handle.stop(0));
    }

    /// Stops the loop with the code `promise` resolves to.
    pub fn stop_after_code(&self, promise: &Promise<ExitCode>) {
        let handle = self.clone();
        promise.on_resolved(move |code| handle.stop(code));
    }

    /// Stops the loop. The first recorded code wins; queued tasks are
    /// discarded.
    pub fn stop(&self, code: ExitCode) {
        {
            let mut exit_code = self
                .shared
                .exit_code
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            exit_code.get_or_insert(code);
        }
        self.shared.pool.stop();
        log_lifecycle!("event_loop", self.shared.id.to_string(), "stopped", code);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.pool.is_stopped()
    }

    /// Blocks until the queue is drained and idle. See [`ThreadPool::wait_all`].
    pub fn wait_all(&self) {
        self.shared.pool.wait_all();
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.shared.pool.metrics()
    }
}

/// Owner of a worker pool and the place promise continuations run.
///
/// The loop stays on the thread that built it; hand [`LoopHandle`] clones to
/// other threads instead. Dropping the loop stops and joins its pool.
pub struct EventLoop {
    handle: LoopHandle,
    _not_send: PhantomData<*const ()>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop").field("handle", &self.handle).finish()
    }
}

impl EventLoop {
    /// Creates a loop with the default configuration.
    pub fn new() -> RuntimeResult<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    /// Creates a loop and makes it current on the calling thread.
    pub fn with_config(config: RuntimeConfig) -> RuntimeResult<Self> {
        let occupied = CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .and_then(Weak::upgrade)
                .is_some()
        });
        if occupied {
            return Err(RuntimeError::LoopAlreadyRunning);
        }

        let id = Uuid::new_v4();
        let span = loop_span!(id.to_string());
        let _guard = span.enter();

        let pool = ThreadPool::new(config)?;
        let pool_id = pool.id();
        let shared = Arc::new(LoopShared {
            id,
            pool,
            exit_code: Mutex::new(None),
        });

        lock_registry().insert(pool_id, Arc::downgrade(&shared));
        CURRENT.with(|current| *current.borrow_mut() = Some(Arc::downgrade(&shared)));
        log_lifecycle!("event_loop", id.to_string(), "created", pool = pool_id);

        Ok(Self {
            handle: LoopHandle { shared },
            _not_send: PhantomData,
        })
    }

    /// Handle of the loop current on the calling thread: the loop the calling
    /// worker belongs to, or the loop constructed on this thread.
    pub fn current() -> Option<LoopHandle> {
        if let Some(pool_id) = pool::current_pool_id() {
            let owner = lock_registry().get(&pool_id).and_then(Weak::upgrade);
            if let Some(shared) = owner {
                return Some(LoopHandle { shared });
            }
        }
        CURRENT
            .with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
            .map(|shared| LoopHandle { shared })
    }

    /// Like [`EventLoop::current`], but an error when no loop is current.
    pub fn try_current() -> RuntimeResult<LoopHandle> {
        Self::current().ok_or(RuntimeError::NoCurrentLoop)
    }

    pub fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    /// Blocks until the loop is stopped and returns its exit code. Fails with
    /// `RuntimeError::TaskFailed` when a failing task stopped the loop.
    pub fn exec(&self) -> RuntimeResult<ExitCode> {
        let shared = &self.handle.shared;
        let span = loop_span!(shared.id.to_string());
        let _guard = span.enter();
        log_lifecycle!("event_loop", shared.id.to_string(), "exec");

        shared.pool.wait_stopped();
        if let Some(failure) = shared.pool.failure() {
            return Err(RuntimeError::TaskFailed(failure));
        }
        let code = shared
            .exit_code
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .unwrap_or(0);
        Ok(code)
    }
}

impl Deref for EventLoop {
    type Target = LoopHandle;

    fn deref(&self) -> &LoopHandle {
        &self.handle
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let shared = &self.handle.shared;
        shared.pool.join();
        lock_registry().remove(&shared.pool.id());
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            let ours = current
                .as_ref()
                .map_or(false, |weak| weak.as_ptr() == Arc::as_ptr(shared));
            if ours {
                *current = None;
            }
        });
        log_lifecycle!("event_loop", shared.id.to_string(), "dropped");
    }
}

fn lock_registry() -> std::sync::MutexGuard<'static, HashMap<u64, Weak<LoopShared>>> {
    LOOPS_BY_POOL
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RuntimeConfig {
        RuntimeConfig::default().with_pool_size(2)
    }

    #[test]
    fn second_loop_on_same_thread_is_rejected() {
        let _first = EventLoop::with_config(config()).unwrap();
        let second = EventLoop::with_config(config());
        assert!(matches!(second, Err(RuntimeError::LoopAlreadyRunning)));
    }

    #[test]
    fn new_loop_allowed_after_drop() {
        let first = EventLoop::with_config(config()).unwrap();
        drop(first);
        assert!(EventLoop::current().is_none());
        let second = EventLoop::with_config(config()).unwrap();
        assert!(EventLoop::current().unwrap().same_loop(second.handle()));
    }

    #[test]
    fn workers_see_their_loop_as_current() {
        let event_loop = EventLoop::with_config(config()).unwrap();
        let seen = event_loop.eval(|| EventLoop::current().map(|handle| handle.id()));
        assert_eq!(seen.sync_wait(), Some(event_loop.id()));
    }

    #[test]
    fn try_current_without_loop_fails() {
        let outcome = thread::spawn(EventLoop::try_current).join().unwrap();
        assert!(matches!(outcome, Err(RuntimeError::NoCurrentLoop)));
    }

    #[test]
    fn first_stop_code_wins() {
        let event_loop = EventLoop::with_config(config()).unwrap();
        event_loop.stop(3);
        event_loop.stop(4);
        assert_eq!(event_loop.exec().unwrap(), 3);
    }
}
