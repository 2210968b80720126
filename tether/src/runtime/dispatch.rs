//! # Message Dispatch
//!
//! Moves native completion messages off the engine's callback thread and
//! onto the event loop.
//!
//! The engine may call back from any internal thread, with reentrancy rules
//! it does not document, so the callback side does as little as possible: it
//! copies the payload into a channel and makes sure one drain task is queued.
//! The drain task, running on a loop worker, classifies each message in
//! arrival order, settles the matching action, and then hands the raw message
//! to any observers.

use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flume::{Receiver, Sender};
use tether_api::engine::RawMessage;
use tether_api::types::RuntimeResult;
use tracing::debug;

use crate::runtime::action::{ActionTracker, Completion};
use crate::runtime::event_loop::{EventLoop, LoopHandle};
use crate::runtime::message::MessageCatalog;
use crate::{log_dispatch, task_span};

type Observer = Arc<dyn Fn(&RawMessage) + Send + Sync + 'static>;

/// Counters for messages seen by a dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub resolved: u64,
    pub abandoned: u64,
    pub unrecognized: u64,
    pub malformed: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    resolved: AtomicU64,
    abandoned: AtomicU64,
    unrecognized: AtomicU64,
    malformed: AtomicU64,
}

pub(crate) struct DispatchShared {
    handle: LoopHandle,
    catalog: MessageCatalog,
    tracker: ActionTracker,
    observers: Mutex<Vec<Observer>>,
    sender: Sender<RawMessage>,
    receiver: Receiver<RawMessage>,
    /// A drain task is queued or running.
    scheduled: AtomicBool,
    counters: Counters,
}

impl DispatchShared {
    /// Callback-thread entry point. Never runs user code or touches the
    /// tracker.
    pub(crate) fn on_message(self: &Arc<Self>, tag: &str, detail: &str) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(RawMessage::new(tag, detail)).is_err() {
            return;
        }
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            self.schedule_drain();
        }
    }

    fn schedule_drain(self: &Arc<Self>) {
        let shared = self.clone();
        if let Err(e) = self.handle.defer(move || shared.drain()) {
            let dropped = self.receiver.drain().count();
            self.scheduled.store(false, Ordering::Release);
            debug!(error = %e, dropped, "loop stopped; completion messages dropped");
        }
    }

    fn drain(&self) {
        let span = task_span!("dispatch");
        let _guard = span.enter();
        loop {
            while let Ok(message) = self.receiver.try_recv() {
                self.process(&message);
            }
            self.scheduled.store(false, Ordering::Release);
            // A producer may have sent after the last try_recv but seen the
            // flag still set; take the drain back in that case.
            if self.receiver.is_empty() || self.scheduled.swap(true, Ordering::AcqRel) {
                break;
            }
        }
    }

    fn process(&self, message: &RawMessage) {
        let tag = message.tag.as_str();
        match self.catalog.classify(tag, &message.detail) {
            Ok(Some(completion)) => match completion.terminal_status() {
                Some(status) => match self.tracker.complete(completion.id, status) {
                    Completion::Resolved => {
                        self.counters.resolved.fetch_add(1, Ordering::Relaxed);
                        log_dispatch!(tag, "resolved", id = %completion.id, %status);
                    }
                    Completion::Abandoned => {
                        self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                        log_dispatch!(tag, "abandoned", id = %completion.id);
                    }
                    Completion::AlreadySettled | Completion::NotTerminal => {
                        log_dispatch!(tag, "ignored", id = %completion.id);
                    }
                },
                None => {
                    log_dispatch!(tag, "progress", id = %completion.id);
                }
            },
            Ok(None) => {
                self.counters.unrecognized.fetch_add(1, Ordering::Relaxed);
                log_dispatch!(tag, "unrecognized");
            }
            Err(error) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                log_dispatch!(tag, "malformed", error = %error);
            }
        }

        let observers: Vec<Observer> = self
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for observer in observers {
            observer(message);
        }
    }

    fn stats(&self) -> DispatchStats {
        DispatchStats {
            received: self.counters.received.load(Ordering::Relaxed),
            resolved: self.counters.resolved.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            unrecognized: self.counters.unrecognized.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Receives native completion messages for one owner and settles that
/// owner's actions on the loop.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<DispatchShared>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("owner", &self.shared.tracker.owner())
            .field("stats", &self.shared.stats())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(handle: &LoopHandle, catalog: MessageCatalog, tracker: ActionTracker) -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            shared: Arc::new(DispatchShared {
                handle: handle.clone(),
                catalog,
                tracker,
                observers: Mutex::new(Vec::new()),
                sender,
                receiver,
                scheduled: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    /// A dispatcher on the loop current on the calling thread.
    pub fn current(catalog: MessageCatalog, tracker: ActionTracker) -> RuntimeResult<Self> {
        let handle = EventLoop::try_current()?;
        Ok(Self::new(&handle, catalog, tracker))
    }

    /// Adds an observer that sees every message, recognized or not, after
    /// its completion has been applied.
    pub fn with_observer<F>(self, observer: F) -> Self
    where
        F: Fn(&RawMessage) + Send + Sync + 'static,
    {
        self.add_observer(observer);
        self
    }

    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(&RawMessage) + Send + Sync + 'static,
    {
        self.shared
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(observer));
    }

    /// Hands one native message to the loop. Safe to call from any thread.
    pub fn on_message(&self, tag: &str, detail: &str) {
        self.shared.on_message(tag, detail);
    }

    pub fn tracker(&self) -> &ActionTracker {
        &self.shared.tracker
    }

    pub fn catalog(&self) -> &MessageCatalog {
        &self.shared.catalog
    }

    pub fn stats(&self) -> DispatchStats {
        self.shared.stats()
    }

    /// Opaque pointer to register with the engine next to
    /// [`native_callback`](crate::runtime::ffi::native_callback).
    ///
    /// The pointer stays valid while this dispatcher or any clone of it is
    /// alive; keep one alive for as long as the engine may call back.
    pub fn user_arg(&self) -> *mut c_void {
        Arc::as_ptr(&self.shared) as *mut c_void
    }
}
