//! Engine update feed.

use ochat_chats::{Conversation, ConversationId, ConversationMember, Message, TypingStatus};

use crate::store::MergeOutcome;

/// A change to engine state, published after the store was updated.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ConversationUpserted(Conversation),
    MemberUpserted(ConversationMember),
    MessageMerged {
        message: Message,
        outcome: MergeOutcome,
    },
    TypingChanged {
        conversation_id: ConversationId,
        typing: Vec<TypingStatus>,
    },
}
