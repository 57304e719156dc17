//! The seam the synchronization engine talks to.

use async_trait::async_trait;
use ochat_chats::{
    Conversation, ConversationId, ConversationMember, Message, NewConversation, NewMember,
    NewMessage, NewReadReceipt, ReadReceipt, TenantScope,
};

use crate::client::RestGateway;
use crate::error::GatewayResult;

/// Persistence operations the engine needs from the chat API.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn create_conversation(&self, request: &NewConversation)
        -> GatewayResult<Conversation>;

    async fn add_member(&self, request: &NewMember) -> GatewayResult<ConversationMember>;

    async fn send_message(&self, request: &NewMessage) -> GatewayResult<Message>;

    async fn mark_read(&self, request: &NewReadReceipt) -> GatewayResult<ReadReceipt>;

    async fn list_conversations(&self, scope: &TenantScope) -> GatewayResult<Vec<Conversation>>;

    async fn list_messages(
        &self,
        scope: &TenantScope,
        conversation_id: ConversationId,
    ) -> GatewayResult<Vec<Message>>;
}

#[async_trait]
impl ChatBackend for RestGateway {
    async fn create_conversation(
        &self,
        request: &NewConversation,
    ) -> GatewayResult<Conversation> {
        RestGateway::create_conversation(self, request).await
    }

    async fn add_member(&self, request: &NewMember) -> GatewayResult<ConversationMember> {
        RestGateway::add_member(self, request).await
    }

    async fn send_message(&self, request: &NewMessage) -> GatewayResult<Message> {
        RestGateway::send_message(self, request).await
    }

    async fn mark_read(&self, request: &NewReadReceipt) -> GatewayResult<ReadReceipt> {
        RestGateway::mark_read(self, request).await
    }

    async fn list_conversations(&self, scope: &TenantScope) -> GatewayResult<Vec<Conversation>> {
        RestGateway::list_conversations(self, scope).await
    }

    async fn list_messages(
        &self,
        scope: &TenantScope,
        conversation_id: ConversationId,
    ) -> GatewayResult<Vec<Message>> {
        RestGateway::list_messages(self, scope, conversation_id).await
    }
}
