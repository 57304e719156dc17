//! # ochat Gateway Crate
//!
//! Typed REST access to the accounts and chat APIs.
//!
//! ## Architecture
//!
//! - **Client**: request pipeline attaching bearer and tenant headers from the
//!   credential store, with a single refresh-and-replay on 401
//! - **Refresh**: single-flight coordinator with a bounded wait-list
//! - **REST**: accounts (login, grant, employees) and chat endpoints
//! - **Notifier**: user-facing error notifications, deduplicated per category
//! - **Backend**: the [`ChatBackend`] trait consumed by the sync engine
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ochat_auth::InMemoryCredentialStore;
//! use ochat_config::ClientConfig;
//! use ochat_gateway::RestGateway;
//!
//! # async fn run() -> Result<(), ochat_gateway::GatewayError> {
//! let config = ClientConfig::default();
//! let gateway = RestGateway::new(
//!     config.api.clone(),
//!     &config.notifications,
//!     Arc::new(InMemoryCredentialStore::new()),
//! )?;
//! let profile = gateway.login("alice@example.com", "secret").await?;
//! let conversations = gateway.list_conversations(&profile.scope).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod client;
pub mod error;
pub mod notifier;
pub mod refresh;
pub mod rest;
pub mod session;

pub use backend::ChatBackend;
pub use client::RestGateway;
pub use error::{ErrorCategory, GatewayError, GatewayResult};
pub use notifier::{ErrorNotifier, Notification, Severity};
pub use refresh::{RefreshCoordinator, RefreshTicket};
pub use session::SessionEvent;
