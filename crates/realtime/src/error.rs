//! Error types for the realtime layer

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// Transport or handshake failure while establishing the connection.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A join/leave (or other awaited invocation) did not complete.
    #[error("{operation} failed: {reason}")]
    ChannelOperation { operation: String, reason: String },

    /// A fire-and-forget invocation could not be queued.
    #[error("Sending {event} failed: {reason}")]
    Send { event: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;

impl RealtimeError {
    pub(crate) fn operation(operation: &str, reason: impl Into<String>) -> Self {
        Self::ChannelOperation {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn send(event: &str, reason: impl Into<String>) -> Self {
        Self::Send {
            event: event.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(error: serde_json::Error) -> Self {
        RealtimeError::Protocol(error.to_string())
    }
}
