//! User-facing error notifications with per-category cooldown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{ErrorCategory, GatewayError};

const NOTIFICATION_BUFFER: usize = 32;
const FALLBACK_MESSAGE: &str = "An unexpected error occurred.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub key: String,
    pub message: String,
    pub severity: Severity,
}

impl Notification {
    pub fn for_error(error: &GatewayError) -> Self {
        let category = error.category();
        let server_message = match error {
            GatewayError::Status { message, .. } if !message.is_empty() => Some(message.clone()),
            _ => None,
        };

        let (message, severity) = match category {
            ErrorCategory::BadRequest => (
                server_message.unwrap_or_else(|| "Bad request.".to_string()),
                Severity::Warning,
            ),
            ErrorCategory::Forbidden => (
                "Access denied. You do not have permission.".to_string(),
                Severity::Danger,
            ),
            ErrorCategory::NotFound => (
                "The requested resource was not found.".to_string(),
                Severity::Warning,
            ),
            ErrorCategory::Timeout => (
                "Request timeout. Please try again.".to_string(),
                Severity::Warning,
            ),
            ErrorCategory::TooManyRequests => (
                "Too many requests. Please slow down.".to_string(),
                Severity::Warning,
            ),
            ErrorCategory::ServerError => (
                "Server error. Please try again later.".to_string(),
                Severity::Danger,
            ),
            ErrorCategory::ServiceUnavailable => (
                "Service temporarily unavailable.".to_string(),
                Severity::Danger,
            ),
            ErrorCategory::Status(_) => (
                server_message.unwrap_or_else(|| FALLBACK_MESSAGE.to_string()),
                Severity::Danger,
            ),
            ErrorCategory::Network => (
                "Please check your internet connection.".to_string(),
                Severity::Danger,
            ),
            ErrorCategory::General => (error.to_string(), Severity::Danger),
            ErrorCategory::SessionExpired => (
                "Session expired. Please log in again.".to_string(),
                Severity::Warning,
            ),
        };

        Self {
            key: category.key(),
            message,
            severity,
        }
    }
}

/// Publishes at most one notification per key per cooldown window.
#[derive(Debug, Clone)]
pub struct ErrorNotifier {
    cooldown: Duration,
    recent: Arc<Mutex<HashMap<String, Instant>>>,
    sender: broadcast::Sender<Notification>,
}

impl ErrorNotifier {
    pub fn new(cooldown: Duration) -> Self {
        let (sender, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            cooldown,
            recent: Arc::new(Mutex::new(HashMap::new())),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn report(&self, error: &GatewayError) -> bool {
        self.publish(Notification::for_error(error))
    }

    /// Returns `false` when the key is still cooling down.
    pub fn publish(&self, notification: Notification) -> bool {
        let now = Instant::now();
        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            recent.retain(|_, shown_at| now.duration_since(*shown_at) < self.cooldown);
            if recent.contains_key(&notification.key) {
                return false;
            }
            recent.insert(notification.key.clone(), now);
        }

        debug!(key = %notification.key, "publishing error notification");
        // no subscribers is fine
        let _ = self.sender.send(notification);
        true
    }
}
