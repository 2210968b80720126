//! # Promise
//!
//! A one-shot, shared result cell bound to an event loop.
//!
//! ## Key Concepts
//! - Every clone of a `Promise` refers to the same cell
//! - `resolve` fills the cell exactly once; a second resolve is a bug and
//!   panics (`try_resolve` hands the value back instead)
//! - Continuations registered with `then` never run inside `resolve`: they
//!   are queued on the loop and run one at a time, in registration order
//! - `.await` suspends without blocking a thread and resumes through the
//!   same queue; `sync_wait` blocks the calling thread instead
//!
//! ## Ordering
//! Continuations registered before resolution fire in registration order.
//! Continuations registered afterwards fire in registration order too, always
//! after every earlier one.

mod spawn;
mod wait;

pub(crate) use spawn::spawn_on;
pub use wait::Wait;

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tether_api::errors::ResolveError;
use tracing::debug;

use crate::runtime::event_loop::LoopHandle;

type Continuation<T> = Box<dyn FnOnce(T) + Send + 'static>;
type ReadyContinuation = Box<dyn FnOnce() + Send + 'static>;

struct Cell<T> {
    value: Option<T>,
    /// Registered before resolution, waiting for the value.
    pending: Vec<Continuation<T>>,
    /// Bound to the value, waiting for their turn on the loop.
    ready: VecDeque<ReadyContinuation>,
    /// A drain task is queued or running for this promise.
    draining: bool,
}

pub(crate) struct PromiseState<T> {
    cell: Mutex<Cell<T>>,
    /// Signalled on resolution; only `sync_wait` waits on it.
    settled: Condvar,
}

impl<T> PromiseState<T> {
    fn lock(&self) -> MutexGuard<'_, Cell<T>> {
        self.cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared one-shot result cell. See the module docs.
pub struct Promise<T> {
    state: Arc<PromiseState<T>>,
    handle: LoopHandle,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.state.lock();
        f.debug_struct("Promise")
            .field("resolved", &cell.value.is_some())
            .field("pending", &cell.pending.len())
            .field("ready", &cell.ready.len())
            .finish()
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// Creates an unresolved promise whose continuations run on `handle`.
    pub fn new(handle: &LoopHandle) -> Self {
        Self {
            state: Arc::new(PromiseState {
                cell: Mutex::new(Cell {
                    value: None,
                    pending: Vec::new(),
                    ready: VecDeque::new(),
                    draining: false,
                }),
                settled: Condvar::new(),
            }),
            handle: handle.clone(),
        }
    }

    /// Creates a promise that is already resolved with `value`.
    pub fn resolved(handle: &LoopHandle, value: T) -> Self {
        let promise = Self::new(handle);
        promise.resolve(value);
        promise
    }

    /// The loop this promise schedules its continuations on.
    pub fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    pub fn is_resolved(&self) -> bool {
        self.state.lock().value.is_some()
    }

    /// A clone of the value, if resolved.
    pub fn peek(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    /// Whether both handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Resolves the promise.
    ///
    /// # Panics
    /// Panics if the promise was already resolved.
    pub fn resolve(&self, value: T) {
        if self.try_resolve(value).is_err() {
            panic!("promise resolved twice");
        }
    }

    /// Resolves the promise, returning the value back if it was already
    /// resolved.
    pub fn try_resolve(&self, value: T) -> Result<(), ResolveError<T>> {
        let mut cell = self.state.lock();
        if cell.value.is_some() {
            return Err(ResolveError { value });
        }
        let pending = mem::take(&mut cell.pending);
        for continuation in pending {
            let delivered = value.clone();
            cell.ready.push_back(Box::new(move || continuation(delivered)));
        }
        cell.value = Some(value);
        let schedule = Self::claim_drain(&mut cell);
        drop(cell);

        self.state.settled.notify_all();
        if schedule {
            self.schedule_drain();
        }
        Ok(())
    }

    /// Registers `f` to run on the loop with the resolved value. Returns a
    /// promise for `f`'s result.
    pub fn then<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        let next = Promise::new(&self.handle);
        let out = next.clone();
        self.on_resolved(move |value| out.resolve(f(value)));
        next
    }

    /// Registers a continuation without creating a result promise.
    pub(crate) fn on_resolved<F>(&self, f: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let mut cell = self.state.lock();
        let value = match &cell.value {
            Some(value) => value.clone(),
            None => {
                cell.pending.push(Box::new(f));
                return;
            }
        };
        cell.ready.push_back(Box::new(move || f(value)));
        let schedule = Self::claim_drain(&mut cell);
        drop(cell);
        if schedule {
            self.schedule_drain();
        }
    }

    /// Combines promises into one resolving with every value, in input order.
    pub fn all(handle: &LoopHandle, promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
        let combined = Promise::new(handle);
        if promises.is_empty() {
            combined.resolve(Vec::new());
            return combined;
        }

        let total = promises.len();
        let slots: Arc<Mutex<(Vec<Option<T>>, usize)>> =
            Arc::new(Mutex::new((vec![None; total], total)));
        for (index, promise) in promises.into_iter().enumerate() {
            let slots = slots.clone();
            let out = combined.clone();
            promise.on_resolved(move |value| {
                let mut guard = slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let (values, remaining) = &mut *guard;
                values[index] = Some(value);
                *remaining -= 1;
                if *remaining == 0 {
                    let collected = values.iter_mut().filter_map(Option::take).collect();
                    drop(guard);
                    out.resolve(collected);
                }
            });
        }
        combined
    }

    /// Resolves with the index and value of the first promise to resolve.
    /// Later resolutions are ignored. With no inputs it never resolves.
    pub fn any(handle: &LoopHandle, promises: Vec<Promise<T>>) -> Promise<(usize, T)> {
        let first = Promise::new(handle);
        for (index, promise) in promises.into_iter().enumerate() {
            let out = first.clone();
            promise.on_resolved(move |value| {
                let _ = out.try_resolve((index, value));
            });
        }
        first
    }

    fn claim_drain(cell: &mut Cell<T>) -> bool {
        if cell.draining || cell.ready.is_empty() {
            return false;
        }
        cell.draining = true;
        true
    }

    fn schedule_drain(&self) {
        schedule_drain(self.state.clone(), self.handle.clone());
    }
}

/// Queues one task that runs the oldest ready continuation, then re-queues
/// itself while more are ready. One drain per promise at a time keeps its
/// continuations sequential.
fn schedule_drain<T>(state: Arc<PromiseState<T>>, handle: LoopHandle)
where
    T: Send + 'static,
{
    let task_state = state.clone();
    let task_handle = handle.clone();
    let deferred = handle.defer(move || {
        let next = task_state.lock().ready.pop_front();
        if let Some(continuation) = next {
            continuation();
        }
        let mut cell = task_state.lock();
        if cell.ready.is_empty() {
            cell.draining = false;
        } else {
            drop(cell);
            schedule_drain(task_state, task_handle);
        }
    });

    if let Err(e) = deferred {
        let mut cell = state.lock();
        let dropped = cell.ready.len();
        cell.ready.clear();
        cell.draining = false;
        debug!(error = %e, dropped, "loop stopped; promise continuations will not run");
    }
}

impl Promise<()> {
    /// Resolves a `Promise<()>`.
    pub fn resolve_unit(&self) {
        self.resolve(());
    }
}

/// Creates a promise that is already resolved with `value`.
pub fn resolve_now<T>(handle: &LoopHandle, value: T) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    Promise::resolved(handle, value)
}
