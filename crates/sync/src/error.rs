//! Error types for the synchronization engine

use ochat_chats::ChatError;
use ochat_gateway::GatewayError;
use ochat_realtime::RealtimeError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The request was rejected before reaching the backend.
    #[error(transparent)]
    Validation(#[from] ChatError),

    /// REST failure, including an expired session.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Only surfaced by `connect`; every other realtime failure is logged.
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
}

impl SyncError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, SyncError::Gateway(GatewayError::AuthExpired))
    }
}
