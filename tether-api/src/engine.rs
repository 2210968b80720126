//! # Native Engine Seam
//!
//! The runtime never talks to the native engine directly. Binding layers
//! implement [`StatusSource`] over the engine's status query call and feed the
//! engine's global callback payloads in as [`RawMessage`] values.

use std::fmt;

use crate::status::{OperationId, Status};

/// Answers status queries for operations posted by one owner.
///
/// Implementations wrap the native `query_status(id)` call and must be safe
/// to call from any thread.
pub trait StatusSource: Send + Sync {
    fn query_status(&self, id: OperationId) -> Status;
}

impl<F> StatusSource for F
where
    F: Fn(OperationId) -> Status + Send + Sync,
{
    fn query_status(&self, id: OperationId) -> Status {
        self(id)
    }
}

/// One payload received on the native callback channel, copied out of the
/// engine's buffers.
#[derive(Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Message tag, e.g. `Controller.Action.Succeeded`.
    pub tag: String,
    /// JSON detail blob as delivered by the engine.
    pub detail: String,
}

impl RawMessage {
    pub fn new(tag: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMessage")
            .field("tag", &self.tag)
            .field("detail_len", &self.detail.len())
            .finish()
    }
}
