use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{wire_time, ConversationId, EmployeeId};

/// Represents a member of a conversation
///
/// Members are unique per (conversation, employee) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMember {
    /// Conversation this member belongs to
    pub conversation_id: ConversationId,
    /// Employee who is a member
    pub employee_id: EmployeeId,
    /// Display name at the time of joining
    #[serde(default)]
    pub employee_name: String,
    /// Whether the member administers the conversation
    #[serde(default)]
    pub is_admin: bool,
    /// When the member joined the conversation
    #[serde(with = "wire_time", default = "Utc::now")]
    pub joined_at: DateTime<Utc>,
}

impl ConversationMember {
    /// Key used for uniqueness in local state
    pub fn key(&self) -> (ConversationId, EmployeeId) {
        (self.conversation_id, self.employee_id)
    }
}
