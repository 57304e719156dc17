use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "ochat.toml",
    "config/ochat.toml",
    "crates/config/ochat.toml",
    "../ochat.toml",
    "../config/ochat.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// REST endpoints and request behaviour.
///
/// ```
/// use ochat_config::ApiConfig;
///
/// let api = ApiConfig::default();
/// assert_eq!(api.request_timeout_seconds, 30);
/// assert!(api.base_url.ends_with('/'));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Accounts API (login, grant, refresh, employees).
    #[serde(default = "ApiConfig::default_base_url")]
    pub base_url: String,
    /// Chat API (conversations, members, messages, read receipts).
    #[serde(default = "ApiConfig::default_chat_base_url")]
    pub chat_base_url: String,
    #[serde(default = "ApiConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "ApiConfig::default_current_domain")]
    pub current_domain: String,
    #[serde(default)]
    pub client: String,
    /// Requests allowed to wait on one in-flight token refresh.
    #[serde(default = "ApiConfig::default_refresh_queue_capacity")]
    pub refresh_queue_capacity: usize,
}

impl ApiConfig {
    fn default_base_url() -> String {
        "https://api.qa.osquare.solutions/api/".to_string()
    }

    fn default_chat_base_url() -> String {
        "https://chat.qa.osquare.solutions/api/".to_string()
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    fn default_current_domain() -> String {
        "localhost".to_string()
    }

    const fn default_refresh_queue_capacity() -> usize {
        64
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            chat_base_url: Self::default_chat_base_url(),
            request_timeout_seconds: Self::default_request_timeout(),
            current_domain: Self::default_current_domain(),
            client: String::new(),
            refresh_queue_capacity: Self::default_refresh_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "RealtimeConfig::default_hub_url")]
    pub hub_url: String,
    #[serde(default = "RealtimeConfig::default_invoke_timeout")]
    pub invoke_timeout_seconds: u64,
    #[serde(default = "RealtimeConfig::default_keep_alive")]
    pub keep_alive_seconds: u64,
    /// How long event delivery stays paused after a reconnect while
    /// conversations are rejoined.
    #[serde(default = "RealtimeConfig::default_rejoin_grace")]
    pub rejoin_grace_seconds: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl RealtimeConfig {
    fn default_hub_url() -> String {
        "wss://chat.qa.osquare.solutions/chathub".to_string()
    }

    const fn default_invoke_timeout() -> u64 {
        15
    }

    const fn default_keep_alive() -> u64 {
        15
    }

    const fn default_rejoin_grace() -> u64 {
        10
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_seconds)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds)
    }

    pub fn rejoin_grace(&self) -> Duration {
        Duration::from_secs(self.rejoin_grace_seconds)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            hub_url: Self::default_hub_url(),
            invoke_timeout_seconds: Self::default_invoke_timeout(),
            keep_alive_seconds: Self::default_keep_alive(),
            rejoin_grace_seconds: Self::default_rejoin_grace(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Exponential backoff used when the hub connection drops.
///
/// ```
/// use ochat_config::ReconnectConfig;
/// use std::time::Duration;
///
/// let policy = ReconnectConfig::default();
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
/// assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "ReconnectConfig::default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "ReconnectConfig::default_max_delay")]
    pub max_delay_secs: u64,
    #[serde(default = "ReconnectConfig::default_max_retries")]
    pub max_retries: u32,
}

impl ReconnectConfig {
    const fn default_initial_delay() -> u64 {
        500
    }

    const fn default_max_delay() -> u64 {
        30
    }

    const fn default_max_retries() -> u32 {
        10
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let cap_ms = self.max_delay_secs.saturating_mul(1000);
        let shift = attempt.saturating_sub(1).min(32);
        let delay_ms = self.initial_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms.min(cap_ms))
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: Self::default_initial_delay(),
            max_delay_secs: Self::default_max_delay(),
            max_retries: Self::default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Window during which a repeated error category is suppressed.
    #[serde(default = "NotificationConfig::default_cooldown")]
    pub cooldown_ms: u64,
}

impl NotificationConfig {
    const fn default_cooldown() -> u64 {
        4_000
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: Self::default_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_credentials_path")]
    pub credentials_path: String,
}

impl StorageConfig {
    fn default_credentials_path() -> String {
        ".ochat/credentials.json".to_string()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials_path: Self::default_credentials_path(),
        }
    }
}

/// Load the client configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use ochat_config::load;
///
/// std::env::remove_var("OCHAT_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.realtime.hub_url.is_empty());
/// ```
pub fn load() -> anyhow::Result<ClientConfig> {
    let defaults = ClientConfig::default();

    let mut builder = config::Config::builder()
        .set_default("api.base_url", defaults.api.base_url.clone())?
        .set_default("api.chat_base_url", defaults.api.chat_base_url.clone())?
        .set_default(
            "api.request_timeout_seconds",
            i64::try_from(defaults.api.request_timeout_seconds).unwrap_or(i64::MAX),
        )?
        .set_default("realtime.hub_url", defaults.realtime.hub_url.clone())?
        .set_default(
            "notifications.cooldown_ms",
            i64::try_from(defaults.notifications.cooldown_ms).unwrap_or(i64::MAX),
        )?
        .set_default(
            "storage.credentials_path",
            defaults.storage.credentials_path.clone(),
        )?;

    let environment_overrides = config::Environment::with_prefix("OCHAT").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("OCHAT_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via OCHAT_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<ClientConfig>()
        .context("invalid configuration")?;

    if config.api.refresh_queue_capacity == 0 {
        config.api.refresh_queue_capacity = 1;
    }

    debug!(?config, "loaded client configuration");
    Ok(config)
}
