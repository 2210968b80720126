//! # Completion Message Catalogue
//!
//! The native engine reports progress through one global callback carrying a
//! tag and a JSON detail blob. Tags of interest look like
//! `<family prefix>.<state>`, for example `Tasker.Task.Succeeded`, and the
//! detail names the operation id under a family-specific field.
//!
//! Tags outside the catalogue are not errors: newer engines emit messages the
//! binding does not know yet, and those are passed to raw observers only.

use lazy_static::lazy_static;
use serde_json::Value;
use tether_api::status::{MessageState, OperationId, Status};

use crate::runtime::error::MessageError;

/// Generic id field tried when a family's own field is absent.
pub const FALLBACK_ID_FIELD: &str = "id";

/// One family of completion messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFamily {
    /// Tag prefix without the trailing state word, e.g. `Controller.Action`.
    pub prefix: String,
    /// Detail field holding the operation id, e.g. `ctrl_id`.
    pub id_field: String,
}

impl MessageFamily {
    pub fn new(prefix: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            id_field: id_field.into(),
        }
    }
}

lazy_static! {
    static ref DEFAULT_FAMILIES: Vec<MessageFamily> = vec![
        MessageFamily::new("Resource.Loading", "res_id"),
        MessageFamily::new("Controller.Action", "ctrl_id"),
        MessageFamily::new("Tasker.Task", "task_id"),
    ];
}

/// A recognized completion message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionMessage {
    pub family: String,
    pub id: OperationId,
    pub state: MessageState,
}

impl CompletionMessage {
    /// Status this message settles its action with; `None` for `Starting`.
    pub fn terminal_status(&self) -> Option<Status> {
        self.state.terminal_status()
    }
}

/// Fixed set of message families the dispatcher understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCatalog {
    families: Vec<MessageFamily>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self {
            families: DEFAULT_FAMILIES.clone(),
        }
    }
}

impl MessageCatalog {
    /// A catalogue with no families; every tag is unrecognized.
    pub fn empty() -> Self {
        Self {
            families: Vec::new(),
        }
    }

    /// Adds a family. A later family with the same prefix replaces the
    /// earlier one.
    pub fn with_family(mut self, prefix: impl Into<String>, id_field: impl Into<String>) -> Self {
        let family = MessageFamily::new(prefix, id_field);
        self.families.retain(|known| known.prefix != family.prefix);
        self.families.push(family);
        self
    }

    pub fn families(&self) -> &[MessageFamily] {
        &self.families
    }

    /// Family whose prefix is everything before the tag's last `.`, together
    /// with the trailing state word.
    pub fn family_for<'a>(&self, tag: &'a str) -> Option<(&MessageFamily, &'a str)> {
        let (prefix, word) = tag.rsplit_once('.')?;
        self.families
            .iter()
            .find(|family| family.prefix == prefix)
            .map(|family| (family, word))
    }

    /// Classifies one native message.
    ///
    /// Returns `Ok(None)` when the tag belongs to no known family. For a known
    /// family, the state word must parse and the detail must be a JSON object
    /// carrying an integer id.
    pub fn classify(
        &self,
        tag: &str,
        detail: &str,
    ) -> Result<Option<CompletionMessage>, MessageError> {
        let Some((family, word)) = self.family_for(tag) else {
            return Ok(None);
        };
        let state = MessageState::from_word(word).ok_or_else(|| MessageError::UnknownState {
            tag: tag.to_string(),
        })?;

        let detail: Value = serde_json::from_str(detail)?;
        let object = detail.as_object().ok_or(MessageError::NotAnObject)?;
        let id = object
            .get(&family.id_field)
            .or_else(|| object.get(FALLBACK_ID_FIELD))
            .and_then(Value::as_i64)
            .ok_or_else(|| MessageError::MissingId {
                family: family.prefix.clone(),
                field: family.id_field.clone(),
            })?;

        Ok(Some(CompletionMessage {
            family: family.prefix.clone(),
            id: OperationId::new(id),
            state,
        }))
    }
}
