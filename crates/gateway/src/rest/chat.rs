//! Chat API: conversations, members, messages and read receipts.

use ochat_chats::{
    Conversation, ConversationId, ConversationMember, Message, NewConversation, NewMember,
    NewMessage, NewReadReceipt, ReadReceipt, TenantScope,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client::{decode, decode_list, decode_optional, ApiRequest, RestGateway};
use crate::error::GatewayResult;

impl RestGateway {
    pub async fn create_conversation(
        &self,
        request: &NewConversation,
    ) -> GatewayResult<Conversation> {
        let api = ApiRequest::post(self.chat_url("Conversation/Add"), request)?;
        let body = self.send_authorized(&api).await?;
        decode(&body)
    }

    pub async fn add_member(&self, request: &NewMember) -> GatewayResult<ConversationMember> {
        let api = ApiRequest::post(self.chat_url("ConversationMember/Add"), request)?;
        let body = self.send_authorized(&api).await?;
        Ok(decode_or_else(&body, || ConversationMember {
            conversation_id: request.conversation_id,
            employee_id: request.employee_id,
            employee_name: request.employee_name.clone(),
            is_admin: request.is_admin,
            joined_at: request.joined_at,
        }))
    }

    pub async fn send_message(&self, request: &NewMessage) -> GatewayResult<Message> {
        let api = ApiRequest::post(self.chat_url("Message/Add"), request)?;
        let body = self.send_authorized(&api).await?;
        decode(&body)
    }

    pub async fn mark_read(&self, request: &NewReadReceipt) -> GatewayResult<ReadReceipt> {
        let api = ApiRequest::post(self.chat_url("MessageRead/Add"), request)?;
        let body = self.send_authorized(&api).await?;
        Ok(decode_or_else(&body, || ReadReceipt {
            message_id: request.message_id,
            employee_id: request.employee_id,
            employee_name: Some(request.employee.clone()),
            read_at: request.read_at,
            scope: request.scope.clone(),
        }))
    }

    pub async fn list_conversations(&self, scope: &TenantScope) -> GatewayResult<Vec<Conversation>> {
        let api = ApiRequest::get(self.chat_url("Conversation/List")).query(scope.query_pairs());
        let body = self.send_authorized(&api).await?;
        decode_list(&body)
    }

    pub async fn list_messages(
        &self,
        scope: &TenantScope,
        conversation_id: ConversationId,
    ) -> GatewayResult<Vec<Message>> {
        let api = ApiRequest::get(self.chat_url("Message/List"))
            .query(scope.query_pairs())
            .query([("conversationId", conversation_id.to_string())]);
        let body = self.send_authorized(&api).await?;
        decode_list(&body)
    }
}

/// Write endpoints do not always echo the stored record; the write itself
/// succeeded, so fall back to what was sent.
fn decode_or_else<T, F>(body: &str, fallback: F) -> T
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    match decode_optional(body) {
        Ok(Some(value)) => value,
        Ok(None) => fallback(),
        Err(err) => {
            debug!(error = %err, "response did not match the record, using request payload");
            fallback()
        }
    }
}
