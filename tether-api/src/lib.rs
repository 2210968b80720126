//! # Tether API
//!
//! Tether turns a handle-based, callback-driven native API into awaitable
//! promises. A native "post" call returns an opaque operation id; some time
//! later the engine reports the operation's terminal state through a global
//! callback on a thread it chooses. This crate holds the contract shared
//! between the runtime and the binding layers built on top of it.
//!
//! ## Core Components
//!
//! - **Operation ids and statuses**: [`OperationId`], [`Status`], [`MessageState`]
//! - **Native engine seam**: [`StatusSource`] and [`RawMessage`]
//! - **Tasks**: boxed closures executed by the runtime's worker pool
//! - **Errors**: [`RuntimeError`] and [`ResolveError`]
//!
//! ## Module Organization
//!
//! - [`status`]: Operation ids and the status vocabulary
//! - [`engine`]: Interfaces the native engine side implements
//! - [`errors`]: Error types and handling
//! - [`types`]: Common type definitions

pub mod engine;
pub mod errors;
pub mod status;
pub mod types;

pub use engine::{RawMessage, StatusSource};
pub use errors::{ResolveError, RuntimeError};
pub use status::{MessageState, OperationId, Status};
pub use types::{BoxedTask, ExitCode, RuntimeResult, TaskResult};
