use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ochat_auth::{FileCredentialStore, SharedCredentialStore};
use ochat_chats::UserProfile;
use ochat_config::ClientConfig;
use ochat_gateway::{RestGateway, SessionEvent};
use ochat_realtime::{AuthContext, RealtimeChannel};
use ochat_sync::{HubTarget, SyncEngine};
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::TRACE)
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Long-lived client services, built once at startup.
#[derive(Clone)]
pub struct ClientServices {
    pub config: ClientConfig,
    pub credentials: SharedCredentialStore,
    pub gateway: RestGateway,
    pub channel: RealtimeChannel,
}

impl ClientServices {
    pub async fn initialise(config: &ClientConfig) -> Result<Self> {
        let path = PathBuf::from(&config.storage.credentials_path);
        let credentials: SharedCredentialStore = Arc::new(FileCredentialStore::new(path));
        Self::with_credentials(config, credentials).await
    }

    pub async fn with_credentials(
        config: &ClientConfig,
        credentials: SharedCredentialStore,
    ) -> Result<Self> {
        let gateway = RestGateway::new(
            config.api.clone(),
            &config.notifications,
            credentials.clone(),
        )
        .context("failed to build REST gateway")?;
        let channel = RealtimeChannel::new(config.realtime.clone());

        let signed_in = credentials
            .credentials()
            .await
            .context("failed to read stored credentials")?
            .is_signed_in();
        info!(signed_in, api = %config.api.base_url, hub = %config.realtime.hub_url, "client services ready");

        Ok(Self {
            config: config.clone(),
            credentials,
            gateway,
            channel,
        })
    }

    /// Sign in and start a session for the returned profile.
    pub async fn login(&self, email: &str, password: &str) -> Result<ClientSession> {
        let profile = self
            .gateway
            .login(email, password)
            .await
            .context("login failed")?;
        Ok(self.start_session(profile))
    }

    /// Start a session from stored credentials, if there are any.
    pub async fn resume(&self) -> Result<Option<ClientSession>> {
        let credentials = self
            .credentials
            .credentials()
            .await
            .context("failed to read stored credentials")?;
        match credentials.profile {
            Some(profile) if credentials.access_token.is_some() => {
                Ok(Some(self.start_session(profile)))
            }
            _ => Ok(None),
        }
    }

    /// Build the engine for `profile` and tie its lifetime to the session.
    pub fn start_session(&self, profile: UserProfile) -> ClientSession {
        let engine = SyncEngine::new(
            Arc::new(self.gateway.clone()),
            Arc::new(self.channel.clone()),
            profile,
            HubTarget::new(
                self.config.realtime.hub_url.clone(),
                AuthContext::from_store(self.credentials.clone()),
            ),
        );

        let (expired_tx, expired) = watch::channel(false);
        let watcher = tokio::spawn(watch_session(
            self.gateway.subscribe_session(),
            engine.clone(),
            expired_tx,
        ));

        info!(employee_id = engine.profile().id, "session started");
        ClientSession {
            engine,
            expired,
            watcher,
        }
    }

    /// End the session and clear stored credentials.
    pub async fn logout(&self, session: ClientSession) -> Result<()> {
        session.end().await;
        self.gateway.logout().await.context("logout failed")?;
        Ok(())
    }
}

/// One signed-in session: the engine plus the watcher that tears it down
/// when the gateway reports the session expired.
pub struct ClientSession {
    engine: SyncEngine,
    expired: watch::Receiver<bool>,
    watcher: JoinHandle<()>,
}

impl ClientSession {
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn is_expired(&self) -> bool {
        *self.expired.borrow()
    }

    /// Resolves once the session has expired and the engine was shut down.
    pub async fn expired(&self) {
        let mut expired = self.expired.clone();
        let _ = expired.wait_for(|expired| *expired).await;
    }

    pub async fn end(self) {
        self.watcher.abort();
        self.engine.shutdown().await;
    }
}

async fn watch_session(
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
    engine: SyncEngine,
    expired: watch::Sender<bool>,
) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Expired) => {
                warn!("session expired, shutting down engine");
                engine.shutdown().await;
                expired.send_replace(true);
                return;
            }
            Ok(SessionEvent::SignedOut) => {
                engine.shutdown().await;
                return;
            }
            Ok(SessionEvent::SignedIn(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "session watcher fell behind");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
