use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{wire_time, ConversationId, EmployeeId, MessageId, TenantScope};

/// A read receipt, as persisted by `MessageRead/Add` and pushed by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub employee_id: EmployeeId,
    #[serde(rename = "employee", default)]
    pub employee_name: Option<String>,
    #[serde(with = "wire_time", default = "Utc::now")]
    pub read_at: DateTime<Utc>,
    #[serde(flatten)]
    pub scope: TenantScope,
}

/// Typing indicator pushed by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    pub conversation_id: ConversationId,
    pub employee_id: EmployeeId,
    #[serde(default)]
    pub employee_name: Option<String>,
    pub is_typing: bool,
}
