//! Shared types for the chat domain.
//!
//! Identifier aliases, the integer-coded wire enums used by the backend,
//! request payloads and the crate error type.

pub mod errors;
pub mod requests;
pub mod wire_time;

pub use errors::{ChatError, ChatResult};
pub use requests::*;

use serde::{Deserialize, Serialize};

pub type ConversationId = i64;
pub type MessageId = i64;
pub type EmployeeId = i64;

/// Workspace / station / company scoping sent with every chat payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantScope {
    #[serde(default)]
    pub workspace_id: Option<i64>,
    #[serde(default)]
    pub station_id: Option<i64>,
    #[serde(default)]
    pub company_id: Option<i64>,
}

impl TenantScope {
    /// Query pairs for list endpoints; absent ids are skipped.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(3);
        if let Some(id) = self.workspace_id {
            pairs.push(("workspaceId", id.to_string()));
        }
        if let Some(id) = self.station_id {
            pairs.push(("stationId", id.to_string()));
        }
        if let Some(id) = self.company_id {
            pairs.push(("companyId", id.to_string()));
        }
        pairs
    }
}

/// Conversation type, encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ConversationType {
    Direct,
    Group,
}

impl TryFrom<u8> for ConversationType {
    type Error = ChatError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ConversationType::Direct),
            1 => Ok(ConversationType::Group),
            other => Err(ChatError::unknown_code("conversation type", other)),
        }
    }
}

impl From<ConversationType> for u8 {
    fn from(kind: ConversationType) -> Self {
        match kind {
            ConversationType::Direct => 0,
            ConversationType::Group => 1,
        }
    }
}

/// Message payload kind. Codes the client does not know are preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    Other(u8),
}

impl From<u8> for MessageKind {
    fn from(code: u8) -> Self {
        match code {
            0 => MessageKind::Text,
            1 => MessageKind::Image,
            2 => MessageKind::File,
            other => MessageKind::Other(other),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Text => 0,
            MessageKind::Image => 1,
            MessageKind::File => 2,
            MessageKind::Other(code) => code,
        }
    }
}

/// Delivery status of a message. Ordered: `Sent < Delivered < Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Move forward to `next`; returns `false` and leaves the status alone
    /// when `next` would be a regression or no change.
    pub fn advance(&mut self, next: MessageStatus) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

impl TryFrom<u8> for MessageStatus {
    type Error = ChatError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(MessageStatus::Sent),
            1 => Ok(MessageStatus::Delivered),
            2 => Ok(MessageStatus::Read),
            other => Err(ChatError::unknown_code("message status", other)),
        }
    }
}

impl From<MessageStatus> for u8 {
    fn from(status: MessageStatus) -> Self {
        match status {
            MessageStatus::Sent => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Read => 2,
        }
    }
}
