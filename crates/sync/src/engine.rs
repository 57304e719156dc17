use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ochat_chats::{
    Conversation, ConversationId, ConversationMember, ConversationType, EmployeeId, Message,
    MessageId, MessageKind, MessageStatus, NewConversation, NewMember, NewMessage,
    NewReadReceipt, ReadReceipt, TypingStatus, UserProfile,
};
use ochat_gateway::ChatBackend;
use ochat_realtime::{
    methods, AuthContext, ChannelState, ConnectionHandle, LinkEvent, LiveChannel, Reconnected,
    Subscription,
};
use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::events::EngineEvent;
use crate::store::{ConversationStore, MergeOutcome, UpsertOutcome};

const UPDATE_BUFFER: usize = 256;

/// Where and how the engine reaches the hub.
#[derive(Debug, Clone)]
pub struct HubTarget {
    pub endpoint: String,
    pub auth: AuthContext,
}

impl HubTarget {
    pub fn new(endpoint: impl Into<String>, auth: AuthContext) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth,
        }
    }
}

struct EngineInner {
    backend: Arc<dyn ChatBackend>,
    channel: Arc<dyn LiveChannel>,
    profile: UserProfile,
    hub: HubTarget,
    store: RwLock<ConversationStore>,
    lifecycle: watch::Sender<ChannelState>,
    updates: broadcast::Sender<EngineEvent>,
    handle: Mutex<Option<ConnectionHandle>>,
    connect_lock: AsyncMutex<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl EngineInner {
    fn handle(&self) -> MutexGuard<'_, Option<ConnectionHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pump(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.updates.send(event);
    }

    fn set_lifecycle(&self, state: ChannelState) {
        let previous = self.lifecycle.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "engine lifecycle changed");
        }
    }

    /// Handle of a live connection, if there is one.
    fn connected_handle(&self) -> Option<ConnectionHandle> {
        if *self.lifecycle.borrow() != ChannelState::Connected {
            return None;
        }
        *self.handle()
    }

    async fn merge(&self, message: Message) -> MergeOutcome {
        let mut store = self.store.write().await;
        let message_id = message.id;
        let outcome = store.merge_message(message);
        if outcome.changed() {
            if let Some(stored) = store.message(message_id) {
                self.publish(EngineEvent::MessageMerged {
                    message: stored.clone(),
                    outcome,
                });
            }
        }
        outcome
    }

    async fn upsert_conversation(&self, conversation: Conversation) -> UpsertOutcome {
        let mut store = self.store.write().await;
        let outcome = store.upsert_conversation(conversation.clone());
        if outcome.changed() {
            self.publish(EngineEvent::ConversationUpserted(conversation));
        }
        outcome
    }

    async fn apply_receipt(&self, receipt: ReadReceipt) {
        let mut store = self.store.write().await;
        let message_id = receipt.message_id;
        store.record_receipt(receipt);
        if let Some(message) = store.advance_status(message_id, MessageStatus::Read) {
            self.publish(EngineEvent::MessageMerged {
                message,
                outcome: MergeOutcome::StatusAdvanced,
            });
        }
    }

    async fn apply_typing(&self, status: TypingStatus) {
        let mut store = self.store.write().await;
        let conversation_id = status.conversation_id;
        if store.set_typing(status) {
            let typing = store.typing_in(conversation_id);
            self.publish(EngineEvent::TypingChanged {
                conversation_id,
                typing,
            });
        }
    }

    async fn join(&self, conversation_id: ConversationId) {
        let Some(handle) = self.connected_handle() else {
            debug!(conversation_id, "not connected, join deferred to next connect");
            return;
        };
        if let Err(err) = self.channel.join_channel(handle, conversation_id).await {
            warn!(conversation_id, error = %err, "joining conversation failed");
        }
    }

    /// Join every tracked conversation, one after another.
    async fn rejoin_all(&self, handle: ConnectionHandle) {
        let ids = self.store.read().await.tracked_ids();
        let mut failed = 0usize;
        for conversation_id in &ids {
            if let Err(err) = self.channel.join_channel(handle, *conversation_id).await {
                failed += 1;
                warn!(%handle, conversation_id, error = %err, "rejoining conversation failed");
            }
        }
        info!(%handle, joined = ids.len() - failed, failed, "rejoined tracked conversations");
    }

    fn broadcast(&self, event: &str, payload: Value) {
        let Some(handle) = self.connected_handle() else {
            debug!(event, "not connected, skipping broadcast");
            return;
        };
        if let Err(err) = self.channel.send(handle, event, payload) {
            warn!(event, error = %err, "broadcast failed");
        }
    }

    async fn on_reconnected(&self, event: Reconnected) {
        let owned = *self.handle() == Some(event.handle);
        if !owned {
            debug!(handle = %event.handle, "reconnect for a connection the engine does not own");
            event.gate.release();
            return;
        }
        self.set_lifecycle(ChannelState::Connected);
        self.rejoin_all(event.handle).await;
        event.gate.release();
    }

    fn on_reconnecting(&self, handle: ConnectionHandle, error: Option<String>) {
        if *self.handle() == Some(handle) {
            self.set_lifecycle(ChannelState::Reconnecting);
            warn!(%handle, ?error, "hub connection lost");
        }
    }

    fn on_closed(&self, handle: ConnectionHandle, error: Option<String>) {
        let mut current = self.handle();
        if *current == Some(handle) {
            current.take();
            drop(current);
            self.set_lifecycle(ChannelState::Disconnected);
            info!(%handle, ?error, "hub connection closed");
        }
    }
}

/// Subscriptions held by the event pump.
struct HubFeed {
    received: Subscription<Message>,
    acked: Subscription<Message>,
    read_receipts: Subscription<ReadReceipt>,
    read_sent: Subscription<ReadReceipt>,
    typing: Subscription<TypingStatus>,
    link: Subscription<LinkEvent>,
}

impl HubFeed {
    fn subscribe(channel: &dyn LiveChannel) -> Self {
        let events = channel.events();
        Self {
            received: events.on_message_received(),
            acked: events.on_message_ack(),
            read_receipts: events.on_read_receipt(),
            read_sent: events.on_read_sent(),
            typing: events.on_typing_status(),
            link: events.on_link(),
        }
    }

    async fn run(mut self, engine: Weak<EngineInner>) {
        loop {
            tokio::select! {
                biased;

                // lifecycle first, in the order the channel emitted it
                Some(event) = self.link.recv() => {
                    let Some(engine) = engine.upgrade() else {
                        if let LinkEvent::Reconnected(event) = event {
                            event.gate.release();
                        }
                        break;
                    };
                    match event {
                        LinkEvent::Reconnecting(event) => {
                            engine.on_reconnecting(event.handle, event.error);
                        }
                        LinkEvent::Reconnected(event) => engine.on_reconnected(event).await,
                        LinkEvent::Closed(event) => engine.on_closed(event.handle, event.error),
                    }
                }
                Some(message) = self.received.recv() => {
                    let Some(engine) = engine.upgrade() else { break };
                    engine.merge(message).await;
                }
                Some(message) = self.acked.recv() => {
                    let Some(engine) = engine.upgrade() else { break };
                    engine.merge(message).await;
                }
                Some(receipt) = self.read_receipts.recv() => {
                    let Some(engine) = engine.upgrade() else { break };
                    engine.apply_receipt(receipt).await;
                }
                Some(receipt) = self.read_sent.recv() => {
                    let Some(engine) = engine.upgrade() else { break };
                    engine.apply_receipt(receipt).await;
                }
                Some(status) = self.typing.recv() => {
                    let Some(engine) = engine.upgrade() else { break };
                    engine.apply_typing(status).await;
                }
                else => break,
            }
        }
        debug!("engine event pump stopped");
    }
}

/// Owns all conversation state for one signed-in session.
///
/// REST writes go first; the realtime broadcast that follows is best-effort
/// and never fails an operation whose REST call succeeded. Messages from REST
/// responses, loads and hub events all pass through one merge routine, so an
/// echo of a message already stored only advances its status.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("profile", &self.inner.profile.id)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        channel: Arc<dyn LiveChannel>,
        profile: UserProfile,
        hub: HubTarget,
    ) -> Self {
        let (lifecycle, _) = watch::channel(ChannelState::Disconnected);
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            inner: Arc::new(EngineInner {
                backend,
                channel,
                profile,
                hub,
                store: RwLock::new(ConversationStore::new()),
                lifecycle,
                updates,
                handle: Mutex::new(None),
                connect_lock: AsyncMutex::new(()),
                pump: Mutex::new(None),
            }),
        }
    }

    pub fn profile(&self) -> &UserProfile {
        &self.inner.profile
    }

    pub fn lifecycle(&self) -> ChannelState {
        *self.inner.lifecycle.borrow()
    }

    pub fn watch_lifecycle(&self) -> watch::Receiver<ChannelState> {
        self.inner.lifecycle.subscribe()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.updates.subscribe()
    }

    /// Connect to the hub and join every tracked conversation.
    ///
    /// Returns the existing handle when the engine is already connected or
    /// reconnecting. Concurrent calls are serialized, so tracked conversations
    /// are joined once.
    pub async fn connect(&self) -> SyncResult<ConnectionHandle> {
        let _connecting = self.inner.connect_lock.lock().await;
        let existing = *self.inner.handle();
        if let Some(handle) = existing {
            if self.lifecycle() != ChannelState::Disconnected {
                return Ok(handle);
            }
        }

        self.ensure_pump();
        self.inner.set_lifecycle(ChannelState::Connecting);

        let handle = match self
            .inner
            .channel
            .connect(&self.inner.hub.endpoint, self.inner.hub.auth.clone())
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                self.inner.set_lifecycle(ChannelState::Disconnected);
                warn!(error = %err, "engine could not connect to the hub");
                return Err(err.into());
            }
        };

        *self.inner.handle() = Some(handle);
        self.inner.set_lifecycle(ChannelState::Connected);
        info!(%handle, "engine connected");
        self.inner.rejoin_all(handle).await;
        Ok(handle)
    }

    /// Close the hub connection. Local state is kept.
    pub async fn disconnect(&self) {
        if let Some(pump) = self.inner.pump().take() {
            pump.abort();
        }
        let handle = self.inner.handle().take();
        if let Some(handle) = handle {
            self.inner.channel.disconnect(handle).await;
        }
        self.inner.set_lifecycle(ChannelState::Disconnected);
    }

    /// Disconnect and drop all local state; used at logout or session expiry.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.inner.store.write().await.clear();
        info!(employee_id = self.inner.profile.id, "engine shut down");
    }

    fn ensure_pump(&self) {
        let mut pump = self.inner.pump();
        if pump.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        // subscribe before spawning so nothing emitted meanwhile is missed
        let feed = HubFeed::subscribe(self.inner.channel.as_ref());
        *pump = Some(tokio::spawn(feed.run(Arc::downgrade(&self.inner))));
    }

    pub async fn create_conversation(
        &self,
        title: &str,
        conversation_type: ConversationType,
    ) -> SyncResult<Conversation> {
        let request = NewConversation::new(&self.inner.profile, title, conversation_type);
        request.validate()?;

        let conversation = self.inner.backend.create_conversation(&request).await?;
        info!(conversation_id = conversation.id, "conversation created");
        self.inner.upsert_conversation(conversation.clone()).await;
        self.inner.join(conversation.id).await;
        Ok(conversation)
    }

    pub async fn add_member(
        &self,
        conversation_id: ConversationId,
        employee_id: EmployeeId,
        employee_name: &str,
        is_admin: bool,
    ) -> SyncResult<ConversationMember> {
        let request = NewMember::new(
            &self.inner.profile,
            conversation_id,
            employee_id,
            employee_name,
            is_admin,
        );
        let member = self.inner.backend.add_member(&request).await?;

        {
            let mut store = self.inner.store.write().await;
            if store.upsert_member(member.clone()) {
                self.inner.publish(EngineEvent::MemberUpserted(member.clone()));
            }
        }

        match serde_json::to_value(request.notice()) {
            Ok(payload) => self
                .inner
                .broadcast(methods::ADD_MEMBER_TO_CONVERSATION, payload),
            Err(err) => warn!(error = %err, "could not encode member notice"),
        }
        Ok(member)
    }

    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        kind: MessageKind,
    ) -> SyncResult<Message> {
        let request = NewMessage::new(&self.inner.profile, conversation_id, content, kind);
        request.validate()?;

        let message = self.inner.backend.send_message(&request).await?;
        debug!(conversation_id, message_id = message.id, "message persisted");
        self.inner.merge(message.clone()).await;

        match serde_json::to_value(&message) {
            Ok(payload) => self.inner.broadcast(methods::SEND_MESSAGE, payload),
            Err(err) => warn!(error = %err, "could not encode message for broadcast"),
        }
        Ok(message)
    }

    /// Record that `employee_id` read `message_id`.
    ///
    /// Repeating the call for the same pair returns the recorded receipt
    /// without another REST write.
    pub async fn mark_read(
        &self,
        message_id: MessageId,
        employee_id: EmployeeId,
    ) -> SyncResult<ReadReceipt> {
        if let Some(receipt) = self.inner.store.read().await.receipt(message_id, employee_id) {
            debug!(message_id, employee_id, "read receipt already recorded");
            return Ok(receipt.clone());
        }

        let request = NewReadReceipt::new(&self.inner.profile, message_id, employee_id);
        let receipt = self.inner.backend.mark_read(&request).await?;

        let receipt = {
            let mut store = self.inner.store.write().await;
            let recorded = store.record_receipt(receipt);
            if let Some(message) = store.advance_status(message_id, MessageStatus::Read) {
                self.inner.publish(EngineEvent::MessageMerged {
                    message,
                    outcome: MergeOutcome::StatusAdvanced,
                });
            }
            recorded
        };

        match serde_json::to_value(&request) {
            Ok(payload) => self.inner.broadcast(methods::SEND_READ_RECEIPT, payload),
            Err(err) => warn!(error = %err, "could not encode read receipt"),
        }
        Ok(receipt)
    }

    /// Merge a message from any source.
    pub async fn receive_message(&self, message: Message) -> MergeOutcome {
        self.inner.merge(message).await
    }

    /// Fetch the conversation list and merge it into local state. Newly
    /// tracked conversations are joined when connected.
    pub async fn load_conversations(&self) -> SyncResult<Vec<Conversation>> {
        let fetched = self
            .inner
            .backend
            .list_conversations(&self.inner.profile.scope)
            .await?;

        let mut new_ids = Vec::new();
        for conversation in fetched {
            let id = conversation.id;
            if self.inner.upsert_conversation(conversation).await == UpsertOutcome::Inserted {
                new_ids.push(id);
            }
        }
        debug!(new = new_ids.len(), "conversations loaded");

        for conversation_id in new_ids {
            self.inner.join(conversation_id).await;
        }
        Ok(self.conversations().await)
    }

    /// Fetch a conversation's messages and merge them into local state.
    pub async fn load_messages(&self, conversation_id: ConversationId) -> SyncResult<Vec<Message>> {
        let fetched = self
            .inner
            .backend
            .list_messages(&self.inner.profile.scope, conversation_id)
            .await?;
        for message in fetched {
            self.inner.merge(message).await;
        }
        Ok(self.list_messages(conversation_id).await)
    }

    pub async fn open_conversation(&self, conversation_id: ConversationId) {
        self.inner.join(conversation_id).await;
    }

    pub async fn close_conversation(&self, conversation_id: ConversationId) {
        let Some(handle) = self.inner.connected_handle() else {
            return;
        };
        if let Err(err) = self
            .inner
            .channel
            .leave_channel(handle, conversation_id)
            .await
        {
            warn!(conversation_id, error = %err, "leaving conversation failed");
        }
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.inner.store.read().await.conversations()
    }

    pub async fn conversation(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.inner
            .store
            .read()
            .await
            .conversation(conversation_id)
            .cloned()
    }

    pub async fn members(&self, conversation_id: ConversationId) -> Vec<ConversationMember> {
        self.inner.store.read().await.members(conversation_id)
    }

    /// Messages ascending by `sent_at`, ties broken by id.
    pub async fn list_messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.inner.store.read().await.messages(conversation_id)
    }

    pub async fn typing_in(&self, conversation_id: ConversationId) -> Vec<TypingStatus> {
        self.inner.store.read().await.typing_in(conversation_id)
    }
}
