//! # Action Tracking
//!
//! Correlates native completion callbacks with the promises waiting on them.
//!
//! ## Key Concepts
//! - A native post returns an [`OperationId`]; [`ActionTracker::put_action`]
//!   turns it into an [`Action`] owning a `Promise<Status>`
//! - The tracker keeps one arena slot per live action, addressed by an
//!   [`ActionKey`] of slot index plus generation, and an index from operation
//!   id to key
//! - The caller holds the only `Action`. Dropping it frees the slot and bumps
//!   its generation, so a completion that arrives later finds nothing and is
//!   a no-op
//!
//! ## Races
//! A completion can race with the drop of its `Action`. Either the
//! completion wins and resolves a promise nobody will read, or the drop wins
//! and the completion is abandoned. Both outcomes are accepted.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tether_api::engine::StatusSource;
use tether_api::errors::RuntimeError;
use tether_api::status::{OperationId, Status};
use tether_api::types::RuntimeResult;
use tracing::{debug, trace, warn};

use crate::runtime::event_loop::LoopHandle;
use crate::runtime::promise::Promise;

/// Generation-checked handle to an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionKey {
    index: usize,
    generation: u64,
}

impl ActionKey {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// What [`ActionTracker::complete`] did with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The live action's promise was resolved.
    Resolved,
    /// No live action has this id; the completion was dropped.
    Abandoned,
    /// The action had already been resolved; the completion was dropped.
    AlreadySettled,
    /// The status is not terminal and settles nothing.
    NotTerminal,
}

struct Entry {
    id: OperationId,
    promise: Promise<Status>,
}

struct Slot {
    generation: u64,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_id: HashMap<OperationId, ActionKey>,
}

impl Arena {
    fn insert(&mut self, entry: Entry) -> ActionKey {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.entry = Some(entry);
                ActionKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                ActionKey {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    fn get(&self, key: ActionKey) -> Option<&Entry> {
        self.slots
            .get(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn remove(&mut self, key: ActionKey) -> Option<Entry> {
        let slot = self.slots.get_mut(key.index)?;
        if slot.generation != key.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation += 1;
        self.free.push(key.index);
        if self.by_id.get(&entry.id) == Some(&key) {
            self.by_id.remove(&entry.id);
        }
        Some(entry)
    }

    fn live(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().filter_map(|slot| slot.entry.as_ref())
    }
}

struct TrackerShared {
    owner: String,
    handle: LoopHandle,
    source: Option<Arc<dyn StatusSource>>,
    arena: Mutex<Arena>,
}

impl TrackerShared {
    fn arena(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registry of live actions for one native owner (a controller, a resource,
/// a tasker). Cheap to clone; clones share the arena.
#[derive(Clone)]
pub struct ActionTracker {
    shared: Arc<TrackerShared>,
}

impl fmt::Debug for ActionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionTracker")
            .field("owner", &self.shared.owner)
            .field("live", &self.live_count())
            .finish()
    }
}

impl ActionTracker {
    /// A tracker whose actions resolve on `handle`'s loop.
    pub fn new(owner: impl Into<String>, handle: &LoopHandle) -> Self {
        Self::build(owner.into(), handle, None)
    }

    /// A tracker that can also ask the engine for an operation's status.
    pub fn with_source(
        owner: impl Into<String>,
        handle: &LoopHandle,
        source: Arc<dyn StatusSource>,
    ) -> Self {
        Self::build(owner.into(), handle, Some(source))
    }

    fn build(owner: String, handle: &LoopHandle, source: Option<Arc<dyn StatusSource>>) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                owner,
                handle: handle.clone(),
                source,
                arena: Mutex::new(Arena::default()),
            }),
        }
    }

    pub fn owner(&self) -> &str {
        &self.shared.owner
    }

    /// Registers the operation a native post call just returned.
    ///
    /// # Errors
    /// `RuntimeError::PostFailed` when `id` is the invalid sentinel; nothing
    /// is registered in that case.
    pub fn put_action(&self, id: OperationId) -> RuntimeResult<Action> {
        if !id.is_valid() {
            return Err(RuntimeError::PostFailed {
                owner: self.shared.owner.clone(),
            });
        }

        let promise = Promise::new(&self.shared.handle);
        let mut arena = self.shared.arena();
        let key = arena.insert(Entry {
            id,
            promise: promise.clone(),
        });
        if let Some(previous) = arena.by_id.insert(id, key) {
            if arena.get(previous).is_some() {
                warn!(
                    owner = %self.shared.owner,
                    %id,
                    "operation id reused while still live; completions go to the newer action"
                );
            }
        }
        drop(arena);

        trace!(owner = %self.shared.owner, %id, slot = key.index, "action registered");
        Ok(Action {
            id,
            key,
            promise,
            tracker: self.shared.clone(),
        })
    }

    /// Settles the live action for `id` with `status`.
    pub fn complete(&self, id: OperationId, status: Status) -> Completion {
        if !status.is_terminal() {
            return Completion::NotTerminal;
        }

        let promise = {
            let arena = self.shared.arena();
            let entry = arena
                .by_id
                .get(&id)
                .and_then(|key| arena.get(*key));
            match entry {
                Some(entry) => entry.promise.clone(),
                None => {
                    debug!(owner = %self.shared.owner, %id, "completion for an abandoned action");
                    return Completion::Abandoned;
                }
            }
        };

        match promise.try_resolve(status) {
            Ok(()) => Completion::Resolved,
            Err(rejected) => {
                warn!(
                    owner = %self.shared.owner,
                    %id,
                    status = %rejected.into_value(),
                    "terminal completion for an already settled action"
                );
                Completion::AlreadySettled
            }
        }
    }

    /// Number of actions whose `Action` is still held.
    pub fn live_count(&self) -> usize {
        self.shared.arena().live().count()
    }

    /// Ids of live actions that have not been settled yet.
    pub fn pending_ids(&self) -> Vec<OperationId> {
        self.shared
            .arena()
            .live()
            .filter(|entry| !entry.promise.is_resolved())
            .map(|entry| entry.id)
            .collect()
    }

    /// Asks the status source about every unsettled live action and settles
    /// the ones it reports terminal. Returns how many were settled.
    ///
    /// This is the fallback for callbacks the engine never delivered; without
    /// a source it does nothing.
    pub fn reconcile(&self) -> usize {
        let Some(source) = &self.shared.source else {
            return 0;
        };
        let mut settled = 0;
        for (id, promise) in self.unsettled() {
            let status = source.query_status(id);
            if status.is_terminal() && promise.try_resolve(status).is_ok() {
                debug!(owner = %self.shared.owner, %id, %status, "settled by status query");
                settled += 1;
            }
        }
        settled
    }

    /// Settles every unsettled live action with `status`. Used when the
    /// native owner goes away and no further callbacks will arrive.
    pub fn settle_all(&self, status: Status) -> usize {
        let settled = self
            .unsettled()
            .into_iter()
            .filter(|(_, promise)| promise.try_resolve(status).is_ok())
            .count();
        if settled > 0 {
            debug!(owner = %self.shared.owner, settled, %status, "settled all pending actions");
        }
        settled
    }

    fn unsettled(&self) -> Vec<(OperationId, Promise<Status>)> {
        self.shared
            .arena()
            .live()
            .filter(|entry| !entry.promise.is_resolved())
            .map(|entry| (entry.id, entry.promise.clone()))
            .collect()
    }
}

/// One in-flight native operation. Dropping it abandons the operation's
/// completion.
pub struct Action {
    id: OperationId,
    key: ActionKey,
    promise: Promise<Status>,
    tracker: Arc<TrackerShared>,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("owner", &self.tracker.owner)
            .field("id", &self.id)
            .field("key", &self.key)
            .field("settled", &self.promise.is_resolved())
            .finish()
    }
}

impl Action {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn key(&self) -> ActionKey {
        self.key
    }

    /// Promise settled with the operation's terminal status.
    pub fn wait(&self) -> Promise<Status> {
        self.promise.clone()
    }

    /// Current status according to the engine, or `Status::Invalid` when the
    /// tracker has no status source.
    pub fn status(&self) -> Status {
        match &self.tracker.source {
            Some(source) => source.query_status(self.id),
            None => Status::Invalid,
        }
    }
}

impl Drop for Action {
    fn drop(&mut self) {
        let removed = self.tracker.arena().remove(self.key);
        if removed.is_some() {
            trace!(owner = %self.tracker.owner, id = %self.id, "action released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::config::RuntimeConfig;
    use crate::runtime::event_loop::EventLoop;

    fn test_loop() -> EventLoop {
        EventLoop::with_config(RuntimeConfig::default().with_pool_size(1)).unwrap()
    }

    #[test]
    fn slots_are_reused_with_a_new_generation() {
        let event_loop = test_loop();
        let tracker = ActionTracker::new("controller", event_loop.handle());
        let first = tracker.put_action(OperationId::new(1)).unwrap();
        let first_key = first.key();
        drop(first);

        let second = tracker.put_action(OperationId::new(2)).unwrap();
        assert_eq!(second.key().index(), first_key.index());
        assert_eq!(second.key().generation(), first_key.generation() + 1);
    }

    #[test]
    fn non_terminal_status_settles_nothing() {
        let event_loop = test_loop();
        let tracker = ActionTracker::new("controller", event_loop.handle());
        let action = tracker.put_action(OperationId::new(3)).unwrap();
        assert_eq!(tracker.complete(action.id(), Status::Pending), Completion::NotTerminal);
        assert!(!action.wait().is_resolved());
    }

    #[test]
    fn second_terminal_completion_is_already_settled() {
        let event_loop = test_loop();
        let tracker = ActionTracker::new("tasker", event_loop.handle());
        let action = tracker.put_action(OperationId::new(4)).unwrap();
        assert_eq!(tracker.complete(action.id(), Status::Failed), Completion::Resolved);
        assert_eq!(tracker.complete(action.id(), Status::Succeeded), Completion::AlreadySettled);
        assert_eq!(action.wait().peek(), Some(Status::Failed));
    }

    #[test]
    fn duplicate_id_routes_to_newer_action() {
        let event_loop = test_loop();
        let tracker = ActionTracker::new("resource", event_loop.handle());
        let older = tracker.put_action(OperationId::new(5)).unwrap();
        let newer = tracker.put_action(OperationId::new(5)).unwrap();
        assert_eq!(tracker.complete(OperationId::new(5), Status::Succeeded), Completion::Resolved);
        assert!(newer.wait().is_resolved());
        assert!(!older.wait().is_resolved());

        // Dropping the older action must not unlink the newer one.
        drop(older);
        assert_eq!(tracker.live_count(), 1);
        assert_eq!(tracker.complete(OperationId::new(5), Status::Failed), Completion::AlreadySettled);
    }

    #[test]
    fn status_without_source_is_invalid() {
        let event_loop = test_loop();
        let tracker = ActionTracker::new("controller", event_loop.handle());
        let action = tracker.put_action(OperationId::new(6)).unwrap();
        assert_eq!(action.status(), Status::Invalid);
        assert_eq!(tracker.reconcile(), 0);
    }
}
