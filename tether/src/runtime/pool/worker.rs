//! # Pool Worker
//!
//! Each worker thread repeatedly takes the oldest task from the shared queue
//! and runs it with the queue lock released.
//!
//! ## Failure Handling
//! Tasks must not fail. A task that returns `Err` or panics is caught with
//! `catch_unwind`, logged, and then handed to the pool's
//! [`TaskFailurePolicy`]: the process is aborted, or the pool is stopped and
//! the failure recorded for the owning loop. A task unwound by
//! [`unwind_stopped`] is not a failure: the pool was already stopping.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace};

use super::queue::{QueuedTask, TaskId};
use super::PoolShared;
use crate::runtime::config::TaskFailurePolicy;
use crate::{log_error, log_lifecycle};

thread_local! {
    /// Pool id and worker index of the calling thread, if it is a worker.
    static WORKER: Cell<Option<(u64, usize)>> = const { Cell::new(None) };
    /// Task currently executing on this thread.
    static CURRENT_TASK: Cell<Option<TaskId>> = const { Cell::new(None) };
}

/// Unwind payload for a task torn down because its pool stopped.
struct StopUnwind;

/// Unwinds out of the current task because the pool stopped while it was
/// blocked. `execute` treats this as a quiet exit rather than a failure.
pub(crate) fn unwind_stopped() -> ! {
    panic::resume_unwind(Box::new(StopUnwind))
}

/// Id of the task running on the calling thread, or `None` outside a task.
pub fn current_task_id() -> Option<TaskId> {
    CURRENT_TASK.with(|current| current.get())
}

/// Id of the pool the calling thread works for, if any.
pub(crate) fn current_pool_id() -> Option<u64> {
    WORKER.with(|worker| worker.get().map(|(id, _)| id))
}

/// Whether the calling thread is a worker of the pool with this id.
pub(crate) fn is_worker_of(pool_id: u64) -> bool {
    WORKER.with(|worker| matches!(worker.get(), Some((id, _)) if id == pool_id))
}

/// Whether the calling thread is a worker of any pool.
pub fn on_worker_thread() -> bool {
    WORKER.with(|worker| worker.get().is_some())
}

/// Worker entry point. Runs under the subscriber that was current when the
/// pool was created, so task logs reach the same sinks as the creator's.
pub(crate) fn run_worker(shared: Arc<PoolShared>, index: usize) {
    let dispatch = shared.dispatch.clone();
    tracing::dispatcher::with_default(&dispatch, || {
        WORKER.with(|worker| worker.set(Some((shared.id, index))));
        log_lifecycle!("worker", index, "started", pool = shared.id);

        while let Some(queued) = shared.queue.pop_blocking() {
            execute(&shared, queued);
        }

        debug!(pool = shared.id, worker = index, "worker exiting");
        WORKER.with(|worker| worker.set(None));
    });
}

/// Runs one popped task on the calling thread. Also used by blocked waiters
/// that help drain the queue, so the previous task id is restored afterwards.
pub(crate) fn execute(shared: &PoolShared, queued: QueuedTask) {
    let QueuedTask { id, task } = queued;
    let previous = CURRENT_TASK.with(|current| current.replace(Some(id)));
    trace!(pool = shared.id, task = %id, "running task");

    let outcome = panic::catch_unwind(AssertUnwindSafe(task));

    CURRENT_TASK.with(|current| current.set(previous));
    shared.queue.finish();

    let failure = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(error)) => format!("{id} returned an error: {error:#}"),
        Err(payload) if payload.is::<StopUnwind>() => {
            debug!(pool = shared.id, task = %id, "task unwound by pool stop");
            return;
        }
        Err(payload) => format!("{id} panicked: {}", panic_message(payload.as_ref())),
    };
    handle_failure(shared, failure);
}

fn handle_failure(shared: &PoolShared, failure: String) {
    log_error!(failure, pool = shared.id, policy = ?shared.config.task_failure_policy);
    match shared.config.task_failure_policy {
        TaskFailurePolicy::Abort => std::process::abort(),
        TaskFailurePolicy::Stop => {
            shared.record_failure(failure);
            shared.stop();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
