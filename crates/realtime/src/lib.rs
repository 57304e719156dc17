//! Realtime hub connection.
//!
//! [`RealtimeChannel`] keeps one WebSocket connection to the chat hub, speaks
//! the JSON hub protocol over it, joins and leaves conversation channels, and
//! fans server events out through [`HubEvents`]. Lost connections are retried
//! with exponential backoff; after a reconnect, server events are held back
//! until the [`ResumeGate`] handed out with [`Reconnected`] is released.

pub mod channel;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;

pub use channel::{AuthContext, ChannelState, LiveChannel, RealtimeChannel};
pub use error::{RealtimeError, RealtimeResult};
pub use events::{
    Closed, ConnectionHandle, HubEvents, LinkEvent, Reconnected, Reconnecting, ResumeGate,
    Subscription,
};
pub use protocol::methods;
pub use transport::{MemoryPeer, MemoryTransport, Transport, TransportLink, WebSocketTransport};
