//! # ochat Chats Crate
//!
//! Domain entities shared by the REST gateway, the realtime channel and the
//! synchronization engine: conversations, members, messages, read receipts,
//! typing notices and the employee directory.
//!
//! ## Architecture
//!
//! - **Entities**: Wire-compatible domain models (Conversation, Message, ...)
//! - **Types**: Identifier aliases, wire enums, request payloads and errors
//!
//! ## Usage
//!
//! ```rust
//! use ochat_chats::{MessageStatus, NewConversation, ConversationType, UserProfile};
//!
//! let profile = UserProfile::new(1, "Alice");
//! let request = NewConversation::new(&profile, "Alice & Bob", ConversationType::Direct);
//! assert!(request.validate().is_ok());
//! assert!(MessageStatus::Read > MessageStatus::Delivered);
//! ```

pub mod entities;
pub mod types;

pub use entities::{
    Conversation, ConversationMember, Employee, Message, ReadReceipt, TypingStatus, UserProfile,
};
pub use types::{
    wire_time, ChatError, ChatResult, ConversationId, ConversationType, EmployeeId, MemberNotice,
    MessageId, MessageKind, MessageStatus, NewConversation, NewMember, NewMessage,
    NewReadReceipt, TenantScope,
};
