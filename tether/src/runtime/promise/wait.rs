use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use tracing::trace;

use super::Promise;
use crate::runtime::pool::unwind_stopped;

/// Future returned by `promise.await` / `promise.into_future()`.
///
/// The first pending poll registers one continuation on the promise; that
/// continuation wakes the latest waker. Because continuations only run as
/// loop tasks, resumption is always scheduled through the queue.
pub struct Wait<T> {
    promise: Promise<T>,
    waker: Option<Arc<Mutex<Option<Waker>>>>,
}

impl<T> Future for Wait<T>
where
    T: Clone + Send + 'static,
{
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        if let Some(value) = this.promise.peek() {
            return Poll::Ready(value);
        }

        match &this.waker {
            Some(slot) => {
                let mut registered = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                *registered = Some(cx.waker().clone());
            }
            None => {
                let slot = Arc::new(Mutex::new(Some(cx.waker().clone())));
                let wake_slot = slot.clone();
                this.promise.on_resolved(move |_| {
                    let waker = wake_slot
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .take();
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                });
                this.waker = Some(slot);
            }
        }
        Poll::Pending
    }
}

impl<T> IntoFuture for Promise<T>
where
    T: Clone + Send + 'static,
{
    type Output = T;
    type IntoFuture = Wait<T>;

    fn into_future(self) -> Wait<T> {
        Wait {
            promise: self,
            waker: None,
        }
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// Blocks the calling thread until the promise resolves.
    ///
    /// Meant for native callbacks that must return a value synchronously.
    /// Called on a worker of this promise's own loop, the worker keeps
    /// running queued tasks while it waits, so a small pool cannot starve
    /// itself. Elsewhere it sleeps on the promise's condition variable.
    ///
    /// On a worker, if the loop stops before the promise resolves, the
    /// blocked task is unwound so its worker can be joined. That unwind is
    /// not reported as a task failure. Off the loop's workers, waiting on a
    /// promise that nothing will resolve blocks forever, including one
    /// returned by [`LoopHandle::eval`](crate::runtime::LoopHandle::eval)
    /// on a stopped loop.
    pub fn sync_wait(&self) -> T {
        let pool = self.handle.pool();
        let helping = pool.is_current_worker();
        let poll_interval = pool.config().sync_wait_poll_interval;
        if helping {
            trace!("sync_wait on a worker thread; running queued tasks while blocked");
        }

        let mut cell = self.state.lock();
        loop {
            if let Some(value) = &cell.value {
                return value.clone();
            }
            if helping {
                drop(cell);
                if pool.is_stopped() {
                    unwind_stopped();
                }
                if !pool.run_pending_one() {
                    let idle = self.state.lock();
                    if idle.value.is_none() {
                        let _ = self
                            .state
                            .settled
                            .wait_timeout(idle, poll_interval)
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                    }
                }
                cell = self.state.lock();
            } else {
                cell = self
                    .state
                    .settled
                    .wait(cell)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        }
    }
}
