use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};

use tether_api::errors::RuntimeError;
use tether_api::types::BoxedTask;

/// Sequence number assigned to a task when it is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

pub(crate) struct QueuedTask {
    pub id: TaskId,
    pub task: BoxedTask,
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<QueuedTask>,
    stopped: bool,
    next_id: u64,
    in_flight: usize,
    // In-flight tasks currently parked in `wait_idle`.
    idle_waiters: usize,
    // Bumped each time idleness is observed; releases every parked waiter.
    idle_epoch: u64,
    executed: u64,
    discarded: u64,
}

/// Counters observed under the queue lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub queued: usize,
    pub in_flight: usize,
    pub executed: u64,
    pub discarded: u64,
    pub stopped: bool,
}

/// FIFO of deferred tasks shared by every worker of one pool.
///
/// One mutex guards the queue, so tasks start in global enqueue order no
/// matter which thread produced them. `work_available` wakes workers;
/// `drained` wakes `wait_all` callers and whoever waits for the stop.
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    work_available: Condvar,
    drained: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            work_available: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    // A task only panics outside the lock, so a poisoned guard still holds
    // consistent queue state.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, task: BoxedTask) -> Result<TaskId, RuntimeError> {
        let mut state = self.lock();
        if state.stopped {
            return Err(RuntimeError::Stopped);
        }
        state.next_id += 1;
        let id = TaskId(state.next_id);
        state.tasks.push_back(QueuedTask { id, task });
        drop(state);
        self.work_available.notify_one();
        Ok(id)
    }

    /// Blocks until a task is available. Returns `None` once the queue is
    /// stopped, even if tasks are still queued.
    pub fn pop_blocking(&self) -> Option<QueuedTask> {
        let mut state = self.lock();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(task) = state.tasks.pop_front() {
                state.in_flight += 1;
                if state.tasks.is_empty() {
                    self.drained.notify_all();
                }
                return Some(task);
            }
            state = self
                .work_available
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn try_pop(&self) -> Option<QueuedTask> {
        let mut state = self.lock();
        if state.stopped {
            return None;
        }
        let task = state.tasks.pop_front()?;
        state.in_flight += 1;
        if state.tasks.is_empty() {
            self.drained.notify_all();
        }
        Some(task)
    }

    /// Marks a popped task as finished.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.executed += 1;
        if state.tasks.is_empty() {
            self.drained.notify_all();
        }
    }

    /// Stops the queue. Returns the tasks that will never run so the caller
    /// can drop them outside the lock. Idempotent.
    pub fn stop(&self) -> Vec<QueuedTask> {
        let mut state = self.lock();
        if state.stopped {
            return Vec::new();
        }
        state.stopped = true;
        let abandoned: Vec<QueuedTask> = state.tasks.drain(..).collect();
        state.discarded += abandoned.len() as u64;
        drop(state);
        self.work_available.notify_all();
        self.drained.notify_all();
        abandoned
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Waits until the queue is empty and every in-flight task is itself
    /// parked here, or the queue is stopped. `from_task` marks a caller that
    /// is one of the in-flight tasks. All waiters parked when idleness is
    /// observed are released together.
    pub fn wait_idle(&self, from_task: bool) {
        let mut state = self.lock();
        if from_task {
            state.idle_waiters += 1;
        }
        let epoch = state.idle_epoch;
        while !state.stopped && state.idle_epoch == epoch {
            if state.tasks.is_empty() && state.in_flight <= state.idle_waiters {
                state.idle_epoch = state.idle_epoch.wrapping_add(1);
                self.drained.notify_all();
                break;
            }
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if from_task {
            state.idle_waiters -= 1;
        }
    }

    pub fn wait_stopped(&self) {
        let mut state = self.lock();
        while !state.stopped {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            queued: state.tasks.len(),
            in_flight: state.in_flight,
            executed: state.executed,
            discarded: state.discarded,
            stopped: state.stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn noop() -> BoxedTask {
        Box::new(|| Ok(()))
    }

    #[test]
    fn ids_follow_enqueue_order() {
        let queue = TaskQueue::new();
        let first = queue.push(noop()).unwrap();
        let second = queue.push(noop()).unwrap();
        assert!(first < second);
        assert_eq!(queue.try_pop().unwrap().id, first);
        assert_eq!(queue.try_pop().unwrap().id, second);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn stop_discards_queued_tasks() {
        let queue = TaskQueue::new();
        queue.push(noop()).unwrap();
        queue.push(noop()).unwrap();

        let abandoned = queue.stop();
        assert_eq!(abandoned.len(), 2);
        assert!(queue.stop().is_empty());
        assert!(queue.pop_blocking().is_none());
        assert!(matches!(queue.push(noop()), Err(RuntimeError::Stopped)));

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.discarded, 2);
        assert!(snapshot.stopped);
    }

    #[test]
    fn finish_tracks_in_flight() {
        let queue = TaskQueue::new();
        queue.push(noop()).unwrap();
        let _task = queue.try_pop().unwrap();
        assert_eq!(queue.snapshot().in_flight, 1);
        queue.finish();
        let snapshot = queue.snapshot();
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.executed, 1);
        queue.wait_idle(false);
    }

    #[test]
    fn parked_tasks_do_not_block_each_other() {
        let queue = Arc::new(TaskQueue::new());
        queue.push(noop()).unwrap();
        queue.push(noop()).unwrap();
        let _first = queue.try_pop().unwrap();
        let _second = queue.try_pop().unwrap();

        let other = Arc::clone(&queue);
        let parked = thread::spawn(move || other.wait_idle(true));
        queue.wait_idle(true);
        parked.join().unwrap();
        assert_eq!(queue.snapshot().in_flight, 2);
    }
}
