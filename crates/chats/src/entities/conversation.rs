use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{wire_time, ConversationId, ConversationType, EmployeeId, TenantScope};

/// A conversation as returned by the chat API.
///
/// The identifier is always assigned by the backend; the client never
/// fabricates one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    #[serde(flatten)]
    pub scope: TenantScope,
    #[serde(default)]
    pub created_by: Option<EmployeeId>,
    #[serde(default)]
    pub created_by_name: Option<String>,
    #[serde(with = "wire_time", default = "Utc::now")]
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl Conversation {
    /// Check if this is a group conversation
    pub fn is_group(&self) -> bool {
        matches!(self.conversation_type, ConversationType::Group)
    }

    /// Overwrite mutable fields with a newer copy of the same conversation.
    ///
    /// Returns `true` when anything changed.
    pub fn absorb(&mut self, newer: Conversation) -> bool {
        if *self == newer {
            return false;
        }
        *self = newer;
        true
    }
}
