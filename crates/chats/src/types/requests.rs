//! Request payloads sent to the chat API and the hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{ChatError, ChatResult};
use super::{
    wire_time, ConversationId, ConversationType, EmployeeId, MessageId, MessageKind,
    MessageStatus, TenantScope,
};
use crate::entities::UserProfile;

const MAX_TITLE_LENGTH: usize = 200;
const MAX_CONTENT_LENGTH: usize = 100_000;

/// Payload for `Conversation/Add`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    #[serde(flatten)]
    pub scope: TenantScope,
    pub created_by: EmployeeId,
    pub created_by_name: String,
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    pub title: String,
    pub is_deleted: bool,
    #[serde(with = "wire_time")]
    pub created_date: DateTime<Utc>,
}

impl NewConversation {
    pub fn new(
        profile: &UserProfile,
        title: impl Into<String>,
        conversation_type: ConversationType,
    ) -> Self {
        Self {
            scope: profile.scope.clone(),
            created_by: profile.id,
            created_by_name: profile.name.clone(),
            conversation_type,
            title: title.into(),
            is_deleted: false,
            created_date: Utc::now(),
        }
    }

    pub fn validate(&self) -> ChatResult<()> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ChatError::validation("Conversation title cannot be empty"));
        }
        if title.chars().count() > MAX_TITLE_LENGTH {
            return Err(ChatError::validation(format!(
                "Conversation title too long (max {MAX_TITLE_LENGTH} characters)"
            )));
        }
        Ok(())
    }
}

/// Payload for `ConversationMember/Add`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMember {
    #[serde(flatten)]
    pub scope: TenantScope,
    pub conversation_id: ConversationId,
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub is_admin: bool,
    #[serde(with = "wire_time")]
    pub joined_at: DateTime<Utc>,
}

impl NewMember {
    pub fn new(
        profile: &UserProfile,
        conversation_id: ConversationId,
        employee_id: EmployeeId,
        employee_name: impl Into<String>,
        is_admin: bool,
    ) -> Self {
        Self {
            scope: profile.scope.clone(),
            conversation_id,
            employee_id,
            employee_name: employee_name.into(),
            is_admin,
            joined_at: Utc::now(),
        }
    }

    /// Hub notice announcing this member to peers.
    pub fn notice(&self) -> MemberNotice {
        MemberNotice {
            conversation_id: self.conversation_id,
            employee_id: self.employee_id,
            employee_name: self.employee_name.clone(),
            is_admin: self.is_admin,
        }
    }
}

/// Payload for the hub's `AddMemberToConversation`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberNotice {
    pub conversation_id: ConversationId,
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub is_admin: bool,
}

/// Payload for `Message/Add`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(flatten)]
    pub scope: TenantScope,
    pub conversation_id: ConversationId,
    pub sender_id: EmployeeId,
    pub sender: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub status: MessageStatus,
    #[serde(with = "wire_time")]
    pub sent_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn new(
        profile: &UserProfile,
        conversation_id: ConversationId,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            scope: profile.scope.clone(),
            conversation_id,
            sender_id: profile.id,
            sender: profile.name.clone(),
            kind,
            content: content.into(),
            status: MessageStatus::Sent,
            sent_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> ChatResult<()> {
        if self.kind == MessageKind::Text && self.content.trim().is_empty() {
            return Err(ChatError::validation("Message content cannot be empty"));
        }
        if self.content.len() > MAX_CONTENT_LENGTH {
            return Err(ChatError::validation(
                "Message content too long (max 100,000 characters)",
            ));
        }
        Ok(())
    }
}

/// Payload for `MessageRead/Add` and the hub's `SendReadReceipt`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReadReceipt {
    #[serde(flatten)]
    pub scope: TenantScope,
    pub message_id: MessageId,
    pub employee_id: EmployeeId,
    pub employee: String,
    #[serde(with = "wire_time")]
    pub read_at: DateTime<Utc>,
}

impl NewReadReceipt {
    pub fn new(profile: &UserProfile, message_id: MessageId, employee_id: EmployeeId) -> Self {
        Self {
            scope: profile.scope.clone(),
            message_id,
            employee_id,
            employee: profile.name.clone(),
            read_at: Utc::now(),
        }
    }
}
