//! # ochat Sync Crate
//!
//! The conversation synchronization engine. [`SyncEngine`] sits between the
//! REST gateway and the realtime channel, owns every conversation, member,
//! message and receipt the client knows about, and keeps that state
//! consistent across REST responses, hub events and reconnects.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ochat_chats::{ConversationType, MessageKind, UserProfile};
//! use ochat_gateway::ChatBackend;
//! use ochat_realtime::{AuthContext, LiveChannel};
//! use ochat_sync::{HubTarget, SyncEngine};
//!
//! # async fn run(backend: Arc<dyn ChatBackend>, channel: Arc<dyn LiveChannel>) -> ochat_sync::SyncResult<()> {
//! let engine = SyncEngine::new(
//!     backend,
//!     channel,
//!     UserProfile::new(5, "Alice"),
//!     HubTarget::new("wss://chat.example.com/chathub", AuthContext::anonymous()),
//! );
//! let conversation = engine
//!     .create_conversation("Alice & Bob", ConversationType::Direct)
//!     .await?;
//! engine.connect().await?;
//! engine
//!     .send_message(conversation.id, "hi", MessageKind::Text)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod events;
pub mod store;

pub use engine::{HubTarget, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use events::EngineEvent;
pub use store::{ConversationStore, MergeOutcome, UpsertOutcome};
