//! Engine and realtime channel together, over the in-process transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ochat_chats::{
    Conversation, ConversationId, ConversationMember, ConversationType, Message, NewConversation,
    NewMember, NewMessage, NewReadReceipt, ReadReceipt, TenantScope, UserProfile,
};
use ochat_config::{RealtimeConfig, ReconnectConfig};
use ochat_gateway::{ChatBackend, GatewayError, GatewayResult};
use ochat_realtime::{AuthContext, ChannelState, MemoryPeer, MemoryTransport, RealtimeChannel};
use ochat_sync::{HubTarget, SyncEngine};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const RS: char = '\u{1e}';
const HUB: &str = "ws://hub.test/chathub";
const WAIT: Duration = Duration::from_secs(3);

/// Lists two conversations; writes are not used here.
struct ListingBackend;

fn unsupported() -> GatewayError {
    GatewayError::Status {
        status: 501,
        message: "not used".to_string(),
    }
}

#[async_trait]
impl ChatBackend for ListingBackend {
    async fn create_conversation(&self, _request: &NewConversation) -> GatewayResult<Conversation> {
        Err(unsupported())
    }

    async fn add_member(&self, _request: &NewMember) -> GatewayResult<ConversationMember> {
        Err(unsupported())
    }

    async fn send_message(&self, _request: &NewMessage) -> GatewayResult<Message> {
        Err(unsupported())
    }

    async fn mark_read(&self, _request: &NewReadReceipt) -> GatewayResult<ReadReceipt> {
        Err(unsupported())
    }

    async fn list_conversations(&self, _scope: &TenantScope) -> GatewayResult<Vec<Conversation>> {
        Ok([1, 2]
            .into_iter()
            .map(|id| Conversation {
                id,
                title: format!("conversation {id}"),
                conversation_type: ConversationType::Group,
                scope: TenantScope::default(),
                created_by: Some(5),
                created_by_name: Some("Alice".to_string()),
                created_date: Utc::now(),
                is_deleted: false,
            })
            .collect())
    }

    async fn list_messages(
        &self,
        _scope: &TenantScope,
        _conversation_id: ConversationId,
    ) -> GatewayResult<Vec<Message>> {
        Ok(Vec::new())
    }
}

fn config() -> RealtimeConfig {
    RealtimeConfig {
        hub_url: HUB.to_string(),
        invoke_timeout_seconds: 2,
        keep_alive_seconds: 30,
        rejoin_grace_seconds: 5,
        reconnect: ReconnectConfig {
            initial_delay_ms: 10,
            max_delay_secs: 1,
            max_retries: 3,
        },
    }
}

async fn accept_and_handshake(peers: &mut UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
    let mut peer = timeout(WAIT, peers.recv())
        .await
        .expect("no connection attempt")
        .expect("transport dropped");
    let request = next_record(&mut peer).await;
    assert_eq!(request["protocol"], "json");
    peer.to_client.send(format!("{{}}{RS}")).unwrap();
    peer
}

async fn next_record(peer: &mut MemoryPeer) -> Value {
    let frame = timeout(WAIT, peer.from_client.recv())
        .await
        .expect("client sent nothing")
        .expect("client closed");
    serde_json::from_str(frame.trim_end_matches(RS)).unwrap()
}

/// Expect a join for `conversation_id` and complete it.
async fn complete_join(peer: &mut MemoryPeer, conversation_id: ConversationId) {
    let record = next_record(peer).await;
    assert_eq!(record["target"], "JoinConversation");
    assert_eq!(record["arguments"], json!([conversation_id]));
    peer.to_client
        .send(format!(
            "{}{RS}",
            json!({ "type": 3, "invocationId": record["invocationId"] })
        ))
        .unwrap();
}

#[tokio::test]
async fn rejoins_over_real_channel_before_buffered_messages_merge() {
    let (transport, mut peers) = MemoryTransport::new();
    let channel = RealtimeChannel::with_transport(config(), Arc::new(transport));
    let engine = SyncEngine::new(
        Arc::new(ListingBackend),
        Arc::new(channel.clone()),
        UserProfile::new(5, "Alice"),
        HubTarget::new(HUB, AuthContext::with_token("token-1")),
    );
    engine.load_conversations().await.unwrap();

    let connecting = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.connect().await })
    };
    let mut peer = accept_and_handshake(&mut peers).await;
    complete_join(&mut peer, 1).await;
    complete_join(&mut peer, 2).await;
    let handle = connecting.await.unwrap().unwrap();
    assert_eq!(engine.lifecycle(), ChannelState::Connected);

    // lose the link; the channel reconnects on its own
    drop(peer);
    let mut peer = accept_and_handshake(&mut peers).await;
    peer.to_client
        .send(format!(
            "{}{RS}",
            json!({
                "type": 1,
                "target": "ReceiveMessage",
                "arguments": [{
                    "id": 9,
                    "conversationId": 1,
                    "senderId": 8,
                    "sender": "Bob",
                    "content": "while away",
                    "status": 1,
                    "sentAt": "2024-05-01T10:00:00Z"
                }]
            })
        ))
        .unwrap();

    complete_join(&mut peer, 1).await;
    assert!(engine.list_messages(1).await.is_empty());
    complete_join(&mut peer, 2).await;

    timeout(WAIT, async {
        while engine.list_messages(1).await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("buffered message was never merged");

    assert_eq!(engine.lifecycle(), ChannelState::Connected);
    assert_eq!(channel.current_handle(), Some(handle));
    assert!(peer.from_client.try_recv().is_err(), "joined a conversation twice");
}
