//! In-memory conversation state.
//!
//! Plain data with no locking of its own; the engine keeps it behind one
//! async lock. Every conversation, member, message and receipt, whether it
//! came from a REST response or a hub event, goes through the methods here.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use ochat_chats::{
    Conversation, ConversationId, ConversationMember, EmployeeId, Message, MessageId,
    MessageStatus, ReadReceipt, TypingStatus,
};

type OrderKey = (DateTime<Utc>, MessageId);

/// What a merge did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The id was new.
    Inserted,
    /// Known id; the status moved forward.
    StatusAdvanced,
    /// Known id; nothing changed.
    Unchanged,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, MergeOutcome::Unchanged)
    }
}

/// What an upsert did to a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: BTreeMap<ConversationId, Conversation>,
    members: HashMap<ConversationId, BTreeMap<EmployeeId, ConversationMember>>,
    messages: HashMap<ConversationId, BTreeMap<OrderKey, Message>>,
    message_index: HashMap<MessageId, (ConversationId, OrderKey)>,
    receipts: HashMap<(MessageId, EmployeeId), ReadReceipt>,
    typing: HashMap<ConversationId, BTreeMap<EmployeeId, TypingStatus>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a conversation.
    pub fn upsert_conversation(&mut self, conversation: Conversation) -> UpsertOutcome {
        match self.conversations.get_mut(&conversation.id) {
            Some(existing) => {
                if existing.absorb(conversation) {
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Unchanged
                }
            }
            None => {
                self.conversations.insert(conversation.id, conversation);
                UpsertOutcome::Inserted
            }
        }
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    /// All tracked conversations, by id.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.conversations.values().cloned().collect()
    }

    pub fn tracked_ids(&self) -> Vec<ConversationId> {
        self.conversations.keys().copied().collect()
    }

    /// Insert or replace a member; (conversation, employee) stays unique.
    /// Returns `true` when the stored member changed.
    pub fn upsert_member(&mut self, member: ConversationMember) -> bool {
        let members = self.members.entry(member.conversation_id).or_default();
        match members.get(&member.employee_id) {
            Some(existing) if *existing == member => false,
            _ => {
                members.insert(member.employee_id, member);
                true
            }
        }
    }

    pub fn members(&self, conversation_id: ConversationId) -> Vec<ConversationMember> {
        self.members
            .get(&conversation_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The single merge routine for messages.
    ///
    /// A new id is inserted in `(sent_at, id)` order. For a known id only the
    /// status may change, and only forward; every other field of the stored
    /// copy wins.
    pub fn merge_message(&mut self, message: Message) -> MergeOutcome {
        if let Some(existing) = self.message_mut(message.id) {
            return if existing.status.advance(message.status) {
                MergeOutcome::StatusAdvanced
            } else {
                MergeOutcome::Unchanged
            };
        }

        let key = message.order_key();
        self.message_index
            .insert(message.id, (message.conversation_id, key));
        self.messages
            .entry(message.conversation_id)
            .or_default()
            .insert(key, message);
        MergeOutcome::Inserted
    }

    /// Move a known message's status forward. Returns the updated copy when it
    /// changed.
    pub fn advance_status(&mut self, message_id: MessageId, status: MessageStatus) -> Option<Message> {
        let message = self.message_mut(message_id)?;
        message.status.advance(status).then(|| message.clone())
    }

    pub fn message(&self, message_id: MessageId) -> Option<&Message> {
        let (conversation_id, key) = self.message_index.get(&message_id)?;
        self.messages.get(conversation_id)?.get(key)
    }

    /// Messages of a conversation, ascending by `sent_at` with ties broken by id.
    pub fn messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.messages
            .get(&conversation_id)
            .map(|messages| messages.values().cloned().collect())
            .unwrap_or_default()
    }

    fn message_mut(&mut self, message_id: MessageId) -> Option<&mut Message> {
        let (conversation_id, key) = self.message_index.get(&message_id)?;
        self.messages.get_mut(conversation_id)?.get_mut(key)
    }

    pub fn receipt(&self, message_id: MessageId, employee_id: EmployeeId) -> Option<&ReadReceipt> {
        self.receipts.get(&(message_id, employee_id))
    }

    /// Record a receipt unless one exists for the same pair; returns the one
    /// that ends up stored.
    pub fn record_receipt(&mut self, receipt: ReadReceipt) -> ReadReceipt {
        self.receipts
            .entry((receipt.message_id, receipt.employee_id))
            .or_insert(receipt)
            .clone()
    }

    /// Apply a typing notice. Returns `true` when the typing set changed.
    pub fn set_typing(&mut self, status: TypingStatus) -> bool {
        let typing = self.typing.entry(status.conversation_id).or_default();
        if status.is_typing {
            typing.insert(status.employee_id, status).is_none()
        } else {
            typing.remove(&status.employee_id).is_some()
        }
    }

    pub fn typing_in(&self, conversation_id: ConversationId) -> Vec<TypingStatus> {
        self.typing
            .get(&conversation_id)
            .map(|typing| typing.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
