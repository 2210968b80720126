use std::future::Future;
use std::sync::{Arc, Mutex};
use std::task::Context;

use futures::future::{BoxFuture, FutureExt};
use futures::task::{waker_ref, ArcWake};
use tracing::debug;

use super::Promise;
use crate::runtime::event_loop::LoopHandle;

/// An async block driven by the loop. Each wake queues one poll task.
struct SpawnedTask {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    handle: LoopHandle,
}

impl SpawnedTask {
    fn schedule(self: &Arc<Self>) {
        let task = self.clone();
        if let Err(e) = self.handle.defer(move || task.poll()) {
            debug!(error = %e, "loop stopped; spawned future abandoned");
        }
    }

    // The lock is held across the poll: a wake that lands mid-poll queues a
    // second poll that simply waits its turn.
    fn poll(self: &Arc<Self>) {
        let mut slot = self.future.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(mut future) = slot.take() else {
            return;
        };
        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        if future.as_mut().poll(&mut cx).is_pending() {
            *slot = Some(future);
        }
    }
}

impl ArcWake for SpawnedTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.schedule();
    }
}

/// Runs `future` on the loop and resolves the returned promise with its
/// output. The first poll is itself a queued task.
pub(crate) fn spawn_on<F, T>(handle: &LoopHandle, future: F) -> Promise<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Clone + Send + 'static,
{
    let promise = Promise::new(handle);
    let out = promise.clone();
    let task = Arc::new(SpawnedTask {
        future: Mutex::new(Some(
            async move {
                let value = future.await;
                out.resolve(value);
            }
            .boxed(),
        )),
        handle: handle.clone(),
    });
    task.schedule();
    promise
}
