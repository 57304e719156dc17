use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    wire_time, ConversationId, EmployeeId, MessageId, MessageKind, MessageStatus, TenantScope,
};

/// Represents a message within a conversation
///
/// Messages are immutable once created; only `status` may change, and only
/// forward (`Sent -> Delivered -> Read`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Backend-assigned identifier
    pub id: MessageId,
    /// Conversation this message belongs to
    pub conversation_id: ConversationId,
    /// Employee who sent the message
    pub sender_id: EmployeeId,
    /// Display name of the sender
    #[serde(rename = "sender", default)]
    pub sender_name: String,
    /// Payload kind
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Text content, or the attachment reference for non-text kinds
    #[serde(default)]
    pub content: String,
    /// Delivery status
    #[serde(default)]
    pub status: MessageStatus,
    /// Backend timestamp
    #[serde(with = "wire_time")]
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub scope: TenantScope,
}

impl Message {
    /// Ordering key used by conversation views
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.sent_at, self.id)
    }

    /// Check if this is a plain text message
    pub fn is_text(&self) -> bool {
        matches!(self.kind, MessageKind::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_from_backend_payload() {
        let message: Message = serde_json::from_value(json!({
            "id": 7,
            "conversationId": 42,
            "senderId": 5,
            "sender": "Alice",
            "type": 0,
            "content": "hi",
            "status": 0,
            "sentAt": "2024-05-01T10:00:00.000Z",
            "workspaceId": 1
        }))
        .unwrap();

        assert_eq!(message.id, 7);
        assert_eq!(message.sender_name, "Alice");
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.scope.workspace_id, Some(1));
        assert!(message.is_text());
    }

    #[test]
    fn test_missing_status_defaults_to_sent() {
        let message: Message = serde_json::from_value(json!({
            "id": 8,
            "conversationId": 42,
            "senderId": 5,
            "content": "hello",
            "sentAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.kind, MessageKind::Text);
    }

    #[test]
    fn test_round_trip_keeps_wire_names() {
        let message: Message = serde_json::from_value(json!({
            "id": 9,
            "conversationId": 42,
            "senderId": 5,
            "sender": "Alice",
            "type": 1,
            "content": "files/cat.png",
            "status": 2,
            "sentAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["sender"], json!("Alice"));
        assert_eq!(value["type"], json!(1));
        assert_eq!(value["status"], json!(2));
        assert_eq!(value["sentAt"], json!("2024-05-01T10:00:00.000Z"));
    }
}
