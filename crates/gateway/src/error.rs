//! Error types for the gateway layer

use ochat_auth::CredentialError;
use thiserror::Error;

/// Gateway error types
///
/// `Clone` so a single refresh failure can be handed to every request that
/// was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Unexpected response body: {0}")]
    Decode(String),

    #[error("Session expired")]
    AuthExpired,

    #[error("Credential store error: {0}")]
    Credentials(String),

    #[error("Too many requests waiting on token refresh")]
    RefreshQueueFull,

    #[error("Token refresh was cancelled")]
    RefreshCancelled,
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Network, timeout, non-2xx and malformed responses: the write or read
    /// did not go through.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_)
                | GatewayError::Timeout
                | GatewayError::Status { .. }
                | GatewayError::Decode(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::Status { status, .. } => match status {
                400 => ErrorCategory::BadRequest,
                403 => ErrorCategory::Forbidden,
                404 => ErrorCategory::NotFound,
                408 => ErrorCategory::Timeout,
                429 => ErrorCategory::TooManyRequests,
                500 => ErrorCategory::ServerError,
                503 => ErrorCategory::ServiceUnavailable,
                other => ErrorCategory::Status(*other),
            },
            GatewayError::Timeout => ErrorCategory::Timeout,
            GatewayError::Network(_) => ErrorCategory::Network,
            GatewayError::AuthExpired => ErrorCategory::SessionExpired,
            GatewayError::Decode(_)
            | GatewayError::Credentials(_)
            | GatewayError::RefreshQueueFull
            | GatewayError::RefreshCancelled => ErrorCategory::General,
        }
    }
}

/// Coarse classification used to deduplicate user-facing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    BadRequest,
    Forbidden,
    NotFound,
    Timeout,
    TooManyRequests,
    ServerError,
    ServiceUnavailable,
    Status(u16),
    Network,
    General,
    SessionExpired,
}

impl ErrorCategory {
    pub fn key(&self) -> String {
        match self {
            ErrorCategory::BadRequest => "bad-request".to_string(),
            ErrorCategory::Forbidden => "forbidden".to_string(),
            ErrorCategory::NotFound => "not-found".to_string(),
            ErrorCategory::Timeout => "timeout".to_string(),
            ErrorCategory::TooManyRequests => "too-many-requests".to_string(),
            ErrorCategory::ServerError => "server-error".to_string(),
            ErrorCategory::ServiceUnavailable => "service-unavailable".to_string(),
            ErrorCategory::Status(status) => format!("error-{status}"),
            ErrorCategory::Network => "network-error".to_string(),
            ErrorCategory::General => "general-error".to_string(),
            ErrorCategory::SessionExpired => "unauthorized".to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            GatewayError::Timeout
        } else if error.is_decode() {
            GatewayError::Decode(error.to_string())
        } else {
            GatewayError::Network(error.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(error: serde_json::Error) -> Self {
        GatewayError::Decode(error.to_string())
    }
}

impl From<CredentialError> for GatewayError {
    fn from(error: CredentialError) -> Self {
        GatewayError::Credentials(error.to_string())
    }
}
