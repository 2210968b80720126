use crate::errors::RuntimeError;

/// Outcome of a deferred task. An `Err` is fatal to the pool that ran it.
pub type TaskResult = anyhow::Result<()>;

/// A unit of deferred work owned by a task queue until it runs.
pub type BoxedTask = Box<dyn FnOnce() -> TaskResult + Send + 'static>;

/// Code returned by `EventLoop::exec` once the loop is stopped.
pub type ExitCode = i32;

pub type RuntimeResult<T> = Result<T, RuntimeError>;
