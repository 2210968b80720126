// Tether Execution Runtime
//
// Turns a handle-based native API that reports completions through a global
// callback into promises that can be chained, awaited, or waited on. The
// contract types live in `tether-api`; this crate holds the worker pool, the
// event loop, promises, action tracking, and message dispatch.

pub mod logging;
pub mod runtime;

pub use runtime::*;
pub use tether_api::{
    MessageState, OperationId, RawMessage, ResolveError, RuntimeError, Status, StatusSource,
};
