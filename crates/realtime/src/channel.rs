//! The realtime channel: one live hub connection per client session.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use ochat_auth::SharedCredentialStore;
use ochat_chats::ConversationId;
use ochat_config::RealtimeConfig;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{RealtimeError, RealtimeResult};
use crate::events::{Closed, ConnectionHandle, HubEvents, Reconnected, Reconnecting, ResumeGate};
use crate::protocol::{self, methods, HubMessage};
use crate::transport::{Transport, TransportLink, WebSocketTransport};

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Where the access token for the hub comes from.
#[derive(Clone, Default)]
pub struct AuthContext {
    credentials: Option<SharedCredentialStore>,
    token: Option<String>,
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("from_store", &self.credentials.is_some())
            .field("static_token", &self.token.is_some())
            .finish()
    }
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Read the current access token on every (re)connect.
    pub fn from_store(credentials: SharedCredentialStore) -> Self {
        Self {
            credentials: Some(credentials),
            token: None,
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            credentials: None,
            token: Some(token.into()),
        }
    }

    pub async fn access_token(&self) -> Option<String> {
        if let Some(token) = &self.token {
            return Some(token.clone());
        }
        let store = self.credentials.as_ref()?;
        match store.access_token().await {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "could not read access token for hub connection");
                None
            }
        }
    }
}

/// The operations the synchronization engine needs from a live channel.
#[async_trait]
pub trait LiveChannel: Send + Sync {
    async fn connect(&self, endpoint: &str, auth: AuthContext) -> RealtimeResult<ConnectionHandle>;

    async fn disconnect(&self, handle: ConnectionHandle);

    async fn join_channel(
        &self,
        handle: ConnectionHandle,
        conversation_id: ConversationId,
    ) -> RealtimeResult<()>;

    async fn leave_channel(
        &self,
        handle: ConnectionHandle,
        conversation_id: ConversationId,
    ) -> RealtimeResult<()>;

    fn send(&self, handle: ConnectionHandle, event: &str, payload: Value) -> RealtimeResult<()>;

    fn events(&self) -> &HubEvents;

    fn state(&self) -> ChannelState;
}

enum Command {
    Invoke {
        target: String,
        arguments: Vec<Value>,
        reply: Option<oneshot::Sender<RealtimeResult<Value>>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

struct Session {
    handle: ConnectionHandle,
    commands: mpsc::UnboundedSender<Command>,
}

struct Shared {
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    events: HubEvents,
    state: Arc<watch::Sender<ChannelState>>,
    session: Mutex<Option<Session>>,
    connect_lock: tokio::sync::Mutex<()>,
    next_handle: AtomicU64,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Client side of the chat hub.
///
/// Cheap to clone. At most one connection is live at a time; `connect` on a
/// live (or reconnecting) channel returns the existing handle.
#[derive(Clone)]
pub struct RealtimeChannel {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RealtimeChannel {
    pub fn new(config: RealtimeConfig) -> Self {
        Self::with_transport(config, Arc::new(WebSocketTransport))
    }

    pub fn with_transport(config: RealtimeConfig, transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                events: HubEvents::default(),
                state: Arc::new(state),
                session: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                next_handle: AtomicU64::new(1),
            }),
        }
    }

    pub fn events(&self) -> &HubEvents {
        &self.shared.events
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    pub fn current_handle(&self) -> Option<ConnectionHandle> {
        self.shared.session().as_ref().map(|session| session.handle)
    }

    pub async fn connect(
        &self,
        endpoint: &str,
        auth: AuthContext,
    ) -> RealtimeResult<ConnectionHandle> {
        let _guard = self.shared.connect_lock.lock().await;

        if let Some(handle) = self.current_handle() {
            debug!(%handle, state = ?self.state(), "hub connection already live");
            return Ok(handle);
        }

        self.shared.state.send_replace(ChannelState::Connecting);
        info!(endpoint, "connecting to chat hub");

        let (link, leftover) = match establish(
            self.shared.transport.as_ref(),
            endpoint,
            &auth,
            self.shared.config.invoke_timeout(),
        )
        .await
        {
            Ok(established) => established,
            Err(err) => {
                self.shared.state.send_replace(ChannelState::Disconnected);
                error!(error = %err, "hub connection failed");
                return Err(err);
            }
        };

        let handle = ConnectionHandle::new(self.shared.next_handle.fetch_add(1, Ordering::SeqCst));
        let (commands, command_rx) = mpsc::unbounded_channel();
        *self.shared.session() = Some(Session {
            handle,
            commands: commands.clone(),
        });
        self.shared.state.send_replace(ChannelState::Connected);

        let mut driver = Driver {
            handle,
            endpoint: endpoint.to_string(),
            auth,
            config: self.shared.config.clone(),
            transport: Arc::clone(&self.shared.transport),
            events: self.shared.events.clone(),
            state: Arc::clone(&self.shared.state),
            shared: Arc::downgrade(&self.shared),
            link,
            commands: command_rx,
            pending: HashMap::new(),
            next_invocation: 0,
            gate: None,
            last_seen: Instant::now(),
        };
        for message in leftover {
            driver.handle_message(message);
        }
        tokio::spawn(driver.run());

        info!(%handle, "connected to chat hub");
        Ok(handle)
    }

    /// Close the connection. Always succeeds locally.
    pub async fn disconnect(&self, handle: ConnectionHandle) {
        let session = {
            let mut slot = self.shared.session();
            match slot.as_ref() {
                Some(session) if session.handle == handle => slot.take(),
                _ => None,
            }
        };

        let Some(session) = session else {
            debug!(%handle, "disconnect for a connection that is not live");
            return;
        };

        let (done, closed) = oneshot::channel();
        if session.commands.send(Command::Close { done }).is_ok()
            && tokio::time::timeout(Duration::from_secs(1), closed)
                .await
                .is_err()
        {
            warn!(%handle, "hub connection did not close in time");
        }

        self.shared.state.send_replace(ChannelState::Disconnected);
        info!(%handle, "disconnected from chat hub");
    }

    pub async fn join_channel(
        &self,
        handle: ConnectionHandle,
        conversation_id: ConversationId,
    ) -> RealtimeResult<()> {
        self.invoke(handle, methods::JOIN_CONVERSATION, vec![json!(conversation_id)])
            .await?;
        debug!(%handle, conversation_id, "joined conversation channel");
        Ok(())
    }

    pub async fn leave_channel(
        &self,
        handle: ConnectionHandle,
        conversation_id: ConversationId,
    ) -> RealtimeResult<()> {
        self.invoke(handle, methods::LEAVE_CONVERSATION, vec![json!(conversation_id)])
            .await?;
        debug!(%handle, conversation_id, "left conversation channel");
        Ok(())
    }

    /// Invoke a hub method and wait for its completion.
    pub async fn invoke(
        &self,
        handle: ConnectionHandle,
        target: &str,
        arguments: Vec<Value>,
    ) -> RealtimeResult<Value> {
        let commands = self
            .live_commands(handle)
            .map_err(|reason| RealtimeError::operation(target, reason))?;

        let (reply, completion) = oneshot::channel();
        commands
            .send(Command::Invoke {
                target: target.to_string(),
                arguments,
                reply: Some(reply),
            })
            .map_err(|_| RealtimeError::operation(target, "connection closed"))?;

        match tokio::time::timeout(self.shared.config.invoke_timeout(), completion).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RealtimeError::operation(target, "connection closed")),
            Err(_) => Err(RealtimeError::operation(target, "timed out")),
        }
    }

    /// Fire-and-forget invocation.
    pub fn send(&self, handle: ConnectionHandle, event: &str, payload: Value) -> RealtimeResult<()> {
        let commands = self
            .live_commands(handle)
            .map_err(|reason| RealtimeError::send(event, reason))?;
        commands
            .send(Command::Invoke {
                target: event.to_string(),
                arguments: vec![payload],
                reply: None,
            })
            .map_err(|_| RealtimeError::send(event, "connection closed"))
    }

    fn live_commands(
        &self,
        handle: ConnectionHandle,
    ) -> Result<mpsc::UnboundedSender<Command>, &'static str> {
        if self.state() != ChannelState::Connected {
            return Err("not connected");
        }
        match self.shared.session().as_ref() {
            Some(session) if session.handle == handle => Ok(session.commands.clone()),
            Some(_) => Err("stale connection handle"),
            None => Err("not connected"),
        }
    }
}

#[async_trait]
impl LiveChannel for RealtimeChannel {
    async fn connect(&self, endpoint: &str, auth: AuthContext) -> RealtimeResult<ConnectionHandle> {
        RealtimeChannel::connect(self, endpoint, auth).await
    }

    async fn disconnect(&self, handle: ConnectionHandle) {
        RealtimeChannel::disconnect(self, handle).await
    }

    async fn join_channel(
        &self,
        handle: ConnectionHandle,
        conversation_id: ConversationId,
    ) -> RealtimeResult<()> {
        RealtimeChannel::join_channel(self, handle, conversation_id).await
    }

    async fn leave_channel(
        &self,
        handle: ConnectionHandle,
        conversation_id: ConversationId,
    ) -> RealtimeResult<()> {
        RealtimeChannel::leave_channel(self, handle, conversation_id).await
    }

    fn send(&self, handle: ConnectionHandle, event: &str, payload: Value) -> RealtimeResult<()> {
        RealtimeChannel::send(self, handle, event, payload)
    }

    fn events(&self) -> &HubEvents {
        RealtimeChannel::events(self)
    }

    fn state(&self) -> ChannelState {
        RealtimeChannel::state(self)
    }
}

fn hub_url(endpoint: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => {
            let separator = if endpoint.contains('?') { '&' } else { '?' };
            format!(
                "{endpoint}{separator}access_token={}",
                urlencoding::encode(token)
            )
        }
        None => endpoint.to_string(),
    }
}

/// Open the transport and complete the handshake. Records that arrived in the
/// same frame as the handshake response are returned for processing.
async fn establish(
    transport: &dyn Transport,
    endpoint: &str,
    auth: &AuthContext,
    timeout: Duration,
) -> RealtimeResult<(TransportLink, Vec<HubMessage>)> {
    let token = auth.access_token().await;
    let mut link = transport.open(&hub_url(endpoint, token.as_deref())).await?;

    link.outbound
        .send(protocol::handshake_request())
        .map_err(|_| RealtimeError::Connection("transport closed during handshake".into()))?;

    let frame = tokio::time::timeout(timeout, link.inbound.recv())
        .await
        .map_err(|_| RealtimeError::Connection("handshake timed out".into()))?
        .ok_or_else(|| RealtimeError::Connection("transport closed during handshake".into()))?;

    let mut records = protocol::split_records(&frame);
    let response = records
        .next()
        .ok_or_else(|| RealtimeError::Connection("empty handshake response".into()))?;
    protocol::parse_handshake_response(response)?;

    let leftover = records
        .filter_map(|record| match protocol::decode(record) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(error = %err, "dropping undecodable hub record");
                None
            }
        })
        .collect();

    Ok((link, leftover))
}

struct Gate {
    resume: ResumeGate,
    deadline: Instant,
    buffered: VecDeque<(String, Vec<Value>)>,
}

enum Flow {
    Continue,
    Lost(String),
    Closed(Option<String>),
}

/// Owns the transport for one logical connection, across reconnects.
struct Driver {
    handle: ConnectionHandle,
    endpoint: String,
    auth: AuthContext,
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    events: HubEvents,
    state: Arc<watch::Sender<ChannelState>>,
    shared: Weak<Shared>,
    link: TransportLink,
    commands: mpsc::UnboundedReceiver<Command>,
    pending: HashMap<String, oneshot::Sender<RealtimeResult<Value>>>,
    next_invocation: u64,
    gate: Option<Gate>,
    last_seen: Instant,
}

impl Driver {
    async fn run(mut self) {
        let keep_alive = self.config.keep_alive().max(Duration::from_millis(100));
        let server_timeout = keep_alive * 2;
        let mut ticker = tokio::time::interval_at(Instant::now() + keep_alive, keep_alive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let gate_resume = self.gate.as_ref().map(|gate| gate.resume.clone());
            let gate_deadline = self.gate.as_ref().map(|gate| gate.deadline);

            let flow = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Invoke { target, arguments, reply }) => {
                        self.invoke(target, arguments, reply);
                        Flow::Continue
                    }
                    Some(Command::Close { done }) => {
                        self.close_link();
                        self.finish(None);
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        // every channel handle is gone
                        self.close_link();
                        self.finish(None);
                        return;
                    }
                },
                frame = self.link.inbound.recv() => match frame {
                    Some(frame) => self.handle_frame(&frame),
                    None => Flow::Lost("transport closed".to_string()),
                },
                _ = ticker.tick() => {
                    if self.last_seen.elapsed() > server_timeout {
                        Flow::Lost("server timeout".to_string())
                    } else {
                        self.send_frame(protocol::encode(&HubMessage::Ping));
                        self.pending.retain(|_, reply| !reply.is_closed());
                        Flow::Continue
                    }
                },
                _ = wait_for_gate(gate_resume) => {
                    self.open_gate("released");
                    Flow::Continue
                },
                _ = sleep_until(gate_deadline) => {
                    self.open_gate("grace period elapsed");
                    Flow::Continue
                },
            };

            match flow {
                Flow::Continue => {}
                Flow::Lost(reason) => {
                    if !self.reconnect(reason).await {
                        return;
                    }
                }
                Flow::Closed(error) => {
                    self.close_link();
                    self.give_up(error);
                    return;
                }
            }
        }
    }

    fn invoke(
        &mut self,
        target: String,
        arguments: Vec<Value>,
        reply: Option<oneshot::Sender<RealtimeResult<Value>>>,
    ) {
        let invocation_id = reply.as_ref().map(|_| {
            self.next_invocation += 1;
            self.next_invocation.to_string()
        });

        let frame = protocol::encode(&HubMessage::Invocation {
            invocation_id: invocation_id.clone(),
            target: target.clone(),
            arguments,
        });

        if self.link.outbound.send(frame).is_err() {
            if let Some(reply) = reply {
                let _ = reply.send(Err(RealtimeError::operation(&target, "connection lost")));
            } else {
                warn!(handle = %self.handle, %target, "dropping send on a lost connection");
            }
            return;
        }

        if let (Some(id), Some(reply)) = (invocation_id, reply) {
            self.pending.insert(id, reply);
        }
    }

    fn handle_frame(&mut self, frame: &str) -> Flow {
        self.last_seen = Instant::now();
        for record in protocol::split_records(frame) {
            let message = match protocol::decode(record) {
                Ok(message) => message,
                Err(err) => {
                    warn!(error = %err, "dropping undecodable hub record");
                    continue;
                }
            };
            if let HubMessage::Close {
                error,
                allow_reconnect,
            } = message
            {
                info!(handle = %self.handle, ?error, allow_reconnect, "hub closed the connection");
                return if allow_reconnect {
                    Flow::Lost(error.unwrap_or_else(|| "server closed".to_string()))
                } else {
                    Flow::Closed(error)
                };
            }
            self.handle_message(message);
        }
        Flow::Continue
    }

    fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Invocation {
                target, arguments, ..
            } => {
                if let Some(gate) = self.gate.as_mut() {
                    gate.buffered.push_back((target, arguments));
                } else {
                    self.events.dispatch(&target, arguments);
                }
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                let Some(reply) = self.pending.remove(&invocation_id) else {
                    debug!(%invocation_id, "completion for unknown invocation");
                    return;
                };
                let outcome = match error {
                    Some(error) => Err(RealtimeError::operation("invocation", error)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = reply.send(outcome);
            }
            HubMessage::Ping => {}
            HubMessage::Close { .. } => {}
            HubMessage::Unsupported(kind) => debug!(kind, "ignoring unsupported hub record"),
        }
    }

    fn open_gate(&mut self, reason: &str) {
        let Some(gate) = self.gate.take() else {
            return;
        };
        debug!(
            handle = %self.handle,
            reason,
            buffered = gate.buffered.len(),
            "resuming hub event delivery"
        );
        for (target, arguments) in gate.buffered {
            self.events.dispatch(&target, arguments);
        }
    }

    fn send_frame(&mut self, frame: String) {
        if self.link.outbound.send(frame).is_err() {
            debug!(handle = %self.handle, "transport already closed");
        }
    }

    fn fail_pending(&mut self, reason: &str) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(RealtimeError::operation("invocation", reason)));
        }
    }

    fn close_link(&mut self) {
        self.send_frame(protocol::encode(&HubMessage::Close {
            error: None,
            allow_reconnect: false,
        }));
        // replacing the sender drops the transport's writer side
        let (closed, _) = mpsc::unbounded_channel();
        self.link.outbound = closed;
    }

    /// Emit the closed event after a caller-initiated close.
    fn finish(&mut self, error: Option<String>) {
        self.fail_pending("connection closed");
        self.gate = None;
        self.events.emit_closed(Closed {
            handle: self.handle,
            error,
        });
    }

    /// The connection ended on its own: clear the live session too.
    fn give_up(&mut self, error: Option<String>) {
        if let Some(shared) = self.shared.upgrade() {
            let mut slot = shared.session();
            if slot.as_ref().map(|session| session.handle) == Some(self.handle) {
                slot.take();
            }
        }
        self.state.send_replace(ChannelState::Disconnected);
        warn!(handle = %self.handle, ?error, "hub connection closed");
        self.finish(error);
    }

    /// Returns `false` when the driver should stop.
    async fn reconnect(&mut self, reason: String) -> bool {
        self.fail_pending("connection lost");
        self.gate = None;
        self.state.send_replace(ChannelState::Reconnecting);
        warn!(handle = %self.handle, %reason, "hub connection lost, reconnecting");
        self.events.emit_reconnecting(Reconnecting {
            handle: self.handle,
            error: Some(reason),
        });

        let policy = self.config.reconnect.clone();
        for attempt in 1..=policy.max_retries {
            let delay = policy.delay_for_attempt(attempt);
            let backoff = tokio::time::sleep(delay);
            tokio::pin!(backoff);

            loop {
                tokio::select! {
                    _ = &mut backoff => break,
                    command = self.commands.recv() => match command {
                        Some(Command::Invoke { target, reply, .. }) => {
                            if let Some(reply) = reply {
                                let _ = reply.send(Err(RealtimeError::operation(&target, "reconnecting")));
                            }
                        }
                        Some(Command::Close { done }) => {
                            self.finish(None);
                            let _ = done.send(());
                            return false;
                        }
                        None => {
                            self.finish(None);
                            return false;
                        }
                    },
                }
            }

            debug!(handle = %self.handle, attempt, ?delay, "reconnect attempt");
            match establish(
                self.transport.as_ref(),
                &self.endpoint,
                &self.auth,
                self.config.invoke_timeout(),
            )
            .await
            {
                Ok((link, leftover)) => {
                    self.link = link;
                    self.last_seen = Instant::now();
                    let resume = ResumeGate::new();
                    self.gate = Some(Gate {
                        resume: resume.clone(),
                        deadline: Instant::now() + self.config.rejoin_grace(),
                        buffered: VecDeque::new(),
                    });
                    for message in leftover {
                        self.handle_message(message);
                    }

                    self.state.send_replace(ChannelState::Connected);
                    info!(handle = %self.handle, attempt, "reconnected to chat hub");
                    let delivered = self.events.emit_reconnected(Reconnected {
                        handle: self.handle,
                        gate: resume,
                    });
                    if !delivered {
                        self.open_gate("no resume listener");
                    }
                    return true;
                }
                Err(err) => {
                    warn!(handle = %self.handle, attempt, error = %err, "reconnect attempt failed");
                }
            }
        }

        self.give_up(Some(format!(
            "gave up after {} reconnect attempts",
            policy.max_retries
        )));
        false
    }
}

async fn wait_for_gate(gate: Option<ResumeGate>) {
    match gate {
        Some(gate) => gate.released().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_url_appends_encoded_token() {
        assert_eq!(
            hub_url("wss://hub.example.com/chathub", Some("a b")),
            "wss://hub.example.com/chathub?access_token=a%20b"
        );
        assert_eq!(
            hub_url("wss://hub.example.com/chathub?tenant=1", Some("t")),
            "wss://hub.example.com/chathub?tenant=1&access_token=t"
        );
        assert_eq!(hub_url("ws://local/hub", None), "ws://local/hub");
    }

    #[tokio::test]
    async fn test_static_token_wins() {
        let auth = AuthContext::with_token("abc");
        assert_eq!(auth.access_token().await.as_deref(), Some("abc"));
        assert!(AuthContext::anonymous().access_token().await.is_none());
    }
}
