use thiserror::Error;

/// Errors raised while classifying a native completion message.
///
/// None of these reach a promise or a caller: the dispatcher logs them at
/// debug level and drops the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Message detail is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Message detail is not a JSON object")]
    NotAnObject,
    #[error("Message of family {family} has no integer `{field}` field")]
    MissingId { family: String, field: String },
    #[error("Unknown state in message tag: {tag}")]
    UnknownState { tag: String },
}

impl From<serde_json::Error> for MessageError {
    fn from(err: serde_json::Error) -> Self {
        MessageError::InvalidJson(err.to_string())
    }
}
