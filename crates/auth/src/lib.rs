//! Credential storage for the chat client.
//!
//! The gateway and the realtime channel read bearer tokens and the tenant
//! scope from a [`CredentialStore`]; only the session flow (login, grant,
//! refresh, logout) writes to it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ochat_chats::UserProfile;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub type CredentialResult<T> = Result<T, CredentialError>;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Everything the client persists between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
}

impl Credentials {
    pub fn is_signed_in(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn company_id(&self) -> Option<i64> {
        self.profile.as_ref().and_then(|p| p.scope.company_id)
    }

    pub fn workspace_id(&self) -> Option<i64> {
        self.profile.as_ref().and_then(|p| p.scope.workspace_id)
    }
}

/// Read/write access to the persisted session.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Snapshot of the current credentials.
    async fn credentials(&self) -> CredentialResult<Credentials>;

    /// Replace the token pair. A `None` refresh token keeps the stored one.
    async fn save_tokens(&self, access_token: &str, refresh_token: Option<&str>)
        -> CredentialResult<()>;

    async fn save_grant_token(&self, grant_token: &str) -> CredentialResult<()>;

    async fn save_profile(&self, profile: &UserProfile) -> CredentialResult<()>;

    /// Forget everything; used on logout and forced session reset.
    async fn clear(&self) -> CredentialResult<()>;

    async fn access_token(&self) -> CredentialResult<Option<String>> {
        Ok(self.credentials().await?.access_token)
    }

    async fn profile(&self) -> CredentialResult<Option<UserProfile>> {
        Ok(self.credentials().await?.profile)
    }
}

pub type SharedCredentialStore = Arc<dyn CredentialStore>;

fn apply_tokens(credentials: &mut Credentials, access_token: &str, refresh_token: Option<&str>) {
    credentials.access_token = Some(access_token.to_owned());
    if let Some(refresh) = refresh_token {
        credentials.refresh_token = Some(refresh.to_owned());
    }
}

/// Process-local store, used by tests and short-lived CLI sessions.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    inner: RwLock<Credentials>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            inner: RwLock::new(credentials),
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn credentials(&self) -> CredentialResult<Credentials> {
        Ok(self.inner.read().await.clone())
    }

    async fn save_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> CredentialResult<()> {
        let mut guard = self.inner.write().await;
        apply_tokens(&mut guard, access_token, refresh_token);
        Ok(())
    }

    async fn save_grant_token(&self, grant_token: &str) -> CredentialResult<()> {
        self.inner.write().await.grant_token = Some(grant_token.to_owned());
        Ok(())
    }

    async fn save_profile(&self, profile: &UserProfile) -> CredentialResult<()> {
        self.inner.write().await.profile = Some(profile.clone());
        Ok(())
    }

    async fn clear(&self) -> CredentialResult<()> {
        *self.inner.write().await = Credentials::default();
        Ok(())
    }
}

/// JSON file backed store. The file is rewritten on every change; reads are
/// served from memory after the first load.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    cache: RwLock<Option<Credentials>>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> CredentialResult<Credentials> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Credentials::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Credentials::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_file(&self, credentials: &Credentials) -> CredentialResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(credentials)?;
        tokio::fs::write(&self.path, bytes).await?;
        debug!(path = %self.path.display(), "persisted credentials");
        Ok(())
    }

    async fn update<F>(&self, apply: F) -> CredentialResult<()>
    where
        F: FnOnce(&mut Credentials) + Send,
    {
        let mut cache = self.cache.write().await;
        let mut credentials = match cache.take() {
            Some(existing) => existing,
            None => self.read_file().await?,
        };
        apply(&mut credentials);
        let result = self.write_file(&credentials).await;
        *cache = Some(credentials);
        result
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn credentials(&self) -> CredentialResult<Credentials> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return Ok(cached.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref() {
            return Ok(cached.clone());
        }
        let loaded = self.read_file().await?;
        *cache = Some(loaded.clone());
        Ok(loaded)
    }

    async fn save_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> CredentialResult<()> {
        self.update(|credentials| apply_tokens(credentials, access_token, refresh_token))
            .await
    }

    async fn save_grant_token(&self, grant_token: &str) -> CredentialResult<()> {
        self.update(|credentials| credentials.grant_token = Some(grant_token.to_owned()))
            .await
    }

    async fn save_profile(&self, profile: &UserProfile) -> CredentialResult<()> {
        self.update(|credentials| credentials.profile = Some(profile.clone()))
            .await
    }

    async fn clear(&self) -> CredentialResult<()> {
        let mut cache = self.cache.write().await;
        *cache = Some(Credentials::default());
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove credential file");
                Err(err.into())
            }
        }
    }
}
