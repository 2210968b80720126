//! # Runtime
//!
//! Execution runtime for callback-driven native APIs.
//!
//! ## Module Organization
//!
//! - [`pool`]: Fixed-size worker pool draining one FIFO task queue
//! - [`event_loop`]: The loop that owns a pool, and its cloneable handle
//! - [`promise`]: One-shot result cells with `then`, `.await` and `sync_wait`
//! - [`action`]: Id-keyed tracking of in-flight native operations
//! - [`message`]: Catalogue of completion message families
//! - [`dispatch`]: Hand-off of native messages onto the loop
//! - [`ffi`]: C ABI trampoline for the engine's message callback
//! - [`config`]: Runtime configuration
//! - [`error`]: Message classification errors

pub mod action;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod ffi;
pub mod message;
pub mod pool;
pub mod promise;

pub use action::{Action, ActionKey, ActionTracker, Completion};
pub use config::{RuntimeConfig, TaskFailurePolicy};
pub use dispatch::{DispatchStats, Dispatcher};
pub use error::MessageError;
pub use event_loop::{EventLoop, LoopHandle};
pub use ffi::{native_callback, NativeCallback};
pub use message::{CompletionMessage, MessageCatalog, MessageFamily};
pub use pool::{current_task_id, on_worker_thread, PoolMetrics, TaskId, ThreadPool};
pub use promise::{resolve_now, Promise, Wait};
