//! # Operation Status Vocabulary
//!
//! Ids and states exchanged with the native engine. An [`OperationId`] is
//! assigned by the engine when an operation is posted and is only ever
//! compared for equality; ordering ids has no meaning.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of one in-flight native operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(i64);

impl OperationId {
    /// Sentinel returned by a failed native post call.
    pub const INVALID: OperationId = OperationId(0);

    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl From<i64> for OperationId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a native operation as reported by a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The engine does not know the id.
    Invalid,
    /// Posted and not finished yet.
    Pending,
    Succeeded,
    Failed,
}

impl Status {
    /// Whether the operation has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed)
    }

    pub fn is_success(self) -> bool {
        self == Status::Succeeded
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Invalid => "invalid",
            Status::Pending => "pending",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Lifecycle state carried by a completion-family message.
///
/// Only the terminal states settle a promise; `Starting` is delivered to raw
/// message observers and otherwise ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    Starting,
    Succeeded,
    Failed,
}

impl MessageState {
    /// Parses the trailing word of a message tag.
    ///
    /// Both the current (`Starting`/`Succeeded`) and the older
    /// (`Started`/`Completed`) vocabularies are accepted, ignoring case.
    pub fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "starting" | "started" => Some(MessageState::Starting),
            "succeeded" | "completed" => Some(MessageState::Succeeded),
            "failed" => Some(MessageState::Failed),
            _ => None,
        }
    }

    /// The status this state settles a promise with, if any.
    pub fn terminal_status(self) -> Option<Status> {
        match self {
            MessageState::Starting => None,
            MessageState::Succeeded => Some(Status::Succeeded),
            MessageState::Failed => Some(Status::Failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_sentinel_is_zero() {
        assert!(!OperationId::INVALID.is_valid());
        assert!(OperationId::new(42).is_valid());
        assert_eq!(OperationId::from(0), OperationId::INVALID);
    }

    #[test]
    fn state_words_ignore_case() {
        assert_eq!(MessageState::from_word("COMPLETED"), Some(MessageState::Succeeded));
        assert_eq!(MessageState::from_word("Started"), Some(MessageState::Starting));
        assert_eq!(MessageState::from_word("failed"), Some(MessageState::Failed));
        assert_eq!(MessageState::from_word("Runout"), None);
    }
}
