//! Typed publish/subscribe for hub events and connection lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ochat_chats::{Message, ReadReceipt, TypingStatus};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

use crate::protocol::methods;

/// Identifies one logical hub connection, stable across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Reconnecting {
    pub handle: ConnectionHandle,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Reconnected {
    pub handle: ConnectionHandle,
    /// Server events stay buffered until this is released.
    pub gate: ResumeGate,
}

#[derive(Debug, Clone)]
pub struct Closed {
    pub handle: ConnectionHandle,
    pub error: Option<String>,
}

/// Holds back server event delivery after a reconnect.
///
/// Releasing is idempotent; any clone may release.
#[derive(Debug, Clone, Default)]
pub struct ResumeGate {
    inner: Arc<GateInner>,
}

#[derive(Debug, Default)]
struct GateInner {
    released: AtomicBool,
    notify: Notify,
}

impl ResumeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        if !self.inner.released.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Resolves once [`release`](Self::release) has been called.
    pub async fn released(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_released() {
                return;
            }
            notified.await;
        }
    }
}

/// A live subscription to one event kind. Dropping it unsubscribes.
///
/// Every subscriber has its own unbounded queue, so a slow reader never
/// loses events and sees them in emit order.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Next event, or `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

/// Connection lifecycle changes, in the order the channel produced them.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Reconnecting(Reconnecting),
    Reconnected(Reconnected),
    Closed(Closed),
}

/// Subscriber list for one event kind.
#[derive(Debug)]
struct Topic<T> {
    kind: &'static str,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> Topic<T> {
    fn new(kind: &'static str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            subscribers: Mutex::new(Vec::new()),
        })
    }

    fn subscribe(&self) -> Subscription<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().push(sender);
        Subscription { receiver }
    }

    /// Deliver to every live subscriber; returns how many got it.
    fn emit(&self, event: T) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        if subscribers.is_empty() {
            trace!(kind = self.kind, "no subscribers");
        }
        subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<T>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out point for every event the channel produces.
#[derive(Debug, Clone)]
pub struct HubEvents {
    message_received: Arc<Topic<Message>>,
    message_ack: Arc<Topic<Message>>,
    read_receipt: Arc<Topic<ReadReceipt>>,
    read_sent: Arc<Topic<ReadReceipt>>,
    typing_status: Arc<Topic<TypingStatus>>,
    reconnecting: Arc<Topic<Reconnecting>>,
    reconnected: Arc<Topic<Reconnected>>,
    closed: Arc<Topic<Closed>>,
    link: Arc<Topic<LinkEvent>>,
}

impl Default for HubEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl HubEvents {
    pub fn new() -> Self {
        Self {
            message_received: Topic::new(methods::RECEIVE_MESSAGE),
            message_ack: Topic::new(methods::MESSAGE_SENT),
            read_receipt: Topic::new(methods::RECEIVE_READ_RECEIPT),
            read_sent: Topic::new(methods::RECEIVE_READ_SENT),
            typing_status: Topic::new(methods::RECEIVE_TYPING_STATUS),
            reconnecting: Topic::new("reconnecting"),
            reconnected: Topic::new("reconnected"),
            closed: Topic::new("closed"),
            link: Topic::new("link"),
        }
    }

    pub fn on_message_received(&self) -> Subscription<Message> {
        self.message_received.subscribe()
    }

    pub fn on_message_ack(&self) -> Subscription<Message> {
        self.message_ack.subscribe()
    }

    pub fn on_read_receipt(&self) -> Subscription<ReadReceipt> {
        self.read_receipt.subscribe()
    }

    pub fn on_read_sent(&self) -> Subscription<ReadReceipt> {
        self.read_sent.subscribe()
    }

    pub fn on_typing_status(&self) -> Subscription<TypingStatus> {
        self.typing_status.subscribe()
    }

    pub fn on_reconnecting(&self) -> Subscription<Reconnecting> {
        self.reconnecting.subscribe()
    }

    pub fn on_reconnected(&self) -> Subscription<Reconnected> {
        self.reconnected.subscribe()
    }

    pub fn on_closed(&self) -> Subscription<Closed> {
        self.closed.subscribe()
    }

    /// Reconnecting, reconnected and closed on one ordered stream.
    pub fn on_link(&self) -> Subscription<LinkEvent> {
        self.link.subscribe()
    }

    pub fn emit_message_received(&self, message: Message) {
        self.message_received.emit(message);
    }

    pub fn emit_message_ack(&self, message: Message) {
        self.message_ack.emit(message);
    }

    pub fn emit_read_receipt(&self, receipt: ReadReceipt) {
        self.read_receipt.emit(receipt);
    }

    pub fn emit_read_sent(&self, receipt: ReadReceipt) {
        self.read_sent.emit(receipt);
    }

    pub fn emit_typing_status(&self, status: TypingStatus) {
        self.typing_status.emit(status);
    }

    pub fn emit_reconnecting(&self, event: Reconnecting) {
        self.link.emit(LinkEvent::Reconnecting(event.clone()));
        self.reconnecting.emit(event);
    }

    /// Returns `false` when nobody is listening, so the caller can release
    /// the gate itself.
    pub fn emit_reconnected(&self, event: Reconnected) -> bool {
        let linked = self.link.emit(LinkEvent::Reconnected(event.clone()));
        linked + self.reconnected.emit(event) > 0
    }

    pub fn emit_closed(&self, event: Closed) {
        self.link.emit(LinkEvent::Closed(event.clone()));
        self.closed.emit(event);
    }

    /// Route a server invocation to its typed subscribers.
    pub fn dispatch(&self, target: &str, arguments: Vec<Value>) {
        let payload = arguments.into_iter().next().unwrap_or(Value::Null);
        match target {
            methods::RECEIVE_MESSAGE => {
                if let Some(message) = parse(target, payload) {
                    self.emit_message_received(message);
                }
            }
            methods::MESSAGE_SENT => {
                if let Some(message) = parse(target, payload) {
                    self.emit_message_ack(message);
                }
            }
            methods::RECEIVE_READ_RECEIPT => {
                if let Some(receipt) = parse(target, payload) {
                    self.emit_read_receipt(receipt);
                }
            }
            methods::RECEIVE_READ_SENT => {
                if let Some(receipt) = parse(target, payload) {
                    self.emit_read_sent(receipt);
                }
            }
            methods::RECEIVE_TYPING_STATUS => {
                if let Some(status) = parse(target, payload) {
                    self.emit_typing_status(status);
                }
            }
            other => debug!(target = other, "ignoring unhandled hub event"),
        }
    }
}

fn parse<T: DeserializeOwned>(target: &str, payload: Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(target, error = %err, "dropping malformed hub event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(id: i64) -> Value {
        json!({
            "id": id,
            "conversationId": 42,
            "senderId": 5,
            "content": "hi",
            "sentAt": "2024-05-01T10:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_target() {
        let events = HubEvents::default();
        let mut received = events.on_message_received();
        let mut acks = events.on_message_ack();
        let mut typing = events.on_typing_status();

        events.dispatch(methods::RECEIVE_MESSAGE, vec![message(1)]);
        events.dispatch(methods::MESSAGE_SENT, vec![message(2)]);
        events.dispatch(
            methods::RECEIVE_TYPING_STATUS,
            vec![json!({ "conversationId": 42, "employeeId": 8, "isTyping": true })],
        );

        assert_eq!(received.recv().await.unwrap().id, 1);
        assert_eq!(acks.recv().await.unwrap().id, 2);
        assert!(typing.recv().await.unwrap().is_typing);
        assert!(received.try_recv().is_none());
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let events = HubEvents::default();
        let mut received = events.on_message_received();
        events.dispatch(methods::RECEIVE_MESSAGE, vec![json!({ "nope": true })]);
        events.dispatch(methods::RECEIVE_MESSAGE, vec![]);
        assert!(received.try_recv().is_none());
    }

    #[test]
    fn test_reconnected_without_listeners_reports_it() {
        let events = HubEvents::default();
        let event = Reconnected {
            handle: ConnectionHandle::new(1),
            gate: ResumeGate::new(),
        };
        assert!(!events.emit_reconnected(event.clone()));

        let _listener = events.on_reconnected();
        assert!(events.emit_reconnected(event));
    }

    #[tokio::test]
    async fn test_slow_subscriber_keeps_every_event_in_order() {
        let events = HubEvents::default();
        let mut received = events.on_message_received();

        for id in 1..=300 {
            events.dispatch(methods::RECEIVE_MESSAGE, vec![message(id)]);
        }

        for id in 1..=300 {
            assert_eq!(received.recv().await.unwrap().id, id);
        }
        assert!(received.try_recv().is_none());
    }

    #[test]
    fn test_link_events_keep_emit_order() {
        let events = HubEvents::default();
        let mut link = events.on_link();
        let handle = ConnectionHandle::new(3);

        events.emit_reconnecting(Reconnecting {
            handle,
            error: None,
        });
        assert!(events.emit_reconnected(Reconnected {
            handle,
            gate: ResumeGate::new(),
        }));
        events.emit_closed(Closed {
            handle,
            error: Some("gone".into()),
        });

        assert!(matches!(link.try_recv(), Some(LinkEvent::Reconnecting(_))));
        assert!(matches!(link.try_recv(), Some(LinkEvent::Reconnected(_))));
        assert!(matches!(link.try_recv(), Some(LinkEvent::Closed(_))));
        assert!(link.try_recv().is_none());
    }

    #[test]
    fn test_dropped_subscription_stops_receiving() {
        let events = HubEvents::default();
        let kept = events.on_message_ack();
        events.on_message_ack().unsubscribe();

        events.dispatch(methods::MESSAGE_SENT, vec![message(1)]);
        assert_eq!(events.message_ack.lock().len(), 1);
        drop(kept);
    }

    #[tokio::test]
    async fn test_resume_gate_releases_waiters() {
        let gate = ResumeGate::new();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.released().await })
        };
        tokio::task::yield_now().await;
        gate.release();
        gate.release();
        waiter.await.unwrap();
        assert!(gate.is_released());
    }
}
