//! Domain entities for the chat client.
//!
//! These mirror the backend's JSON payloads (camelCase, integer-coded enums)
//! and carry no API or storage concerns.

pub mod conversation;
pub mod directory;
pub mod member;
pub mod message;
pub mod receipt;

pub use conversation::Conversation;
pub use directory::{Employee, UserProfile};
pub use member::ConversationMember;
pub use message::Message;
pub use receipt::{ReadReceipt, TypingStatus};
