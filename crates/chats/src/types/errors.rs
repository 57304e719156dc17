//! Error types for the chat domain.

use thiserror::Error;

/// Result type alias for chat domain operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Main error type for the chat domain
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Unknown {field} code: {code}")]
    UnknownCode { field: &'static str, code: u8 },

    #[error("Invalid timestamp: {message}")]
    Timestamp { message: String },
}

impl ChatError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an unknown wire code error
    pub fn unknown_code(field: &'static str, code: u8) -> Self {
        Self::UnknownCode { field, code }
    }
}

impl From<chrono::ParseError> for ChatError {
    fn from(err: chrono::ParseError) -> Self {
        Self::Timestamp {
            message: err.to_string(),
        }
    }
}
