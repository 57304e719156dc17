//! Test plan for the `ochat-config` crate.
//!
//! These tests exercise the configuration loader across default handling,
//! file discovery, environment overrides, and validation behaviour.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use ochat_config::{load, ApiConfig, ClientConfig, ReconnectConfig, RealtimeConfig};

const ENV_VARS_TO_RESET: &[&str] = &[
    "OCHAT_CONFIG",
    "OCHAT__API__BASE_URL",
    "OCHAT__API__CHAT_BASE_URL",
    "OCHAT__API__REQUEST_TIMEOUT_SECONDS",
    "OCHAT__API__REFRESH_QUEUE_CAPACITY",
    "OCHAT__REALTIME__HUB_URL",
    "OCHAT__REALTIME__RECONNECT__MAX_RETRIES",
    "OCHAT__NOTIFICATIONS__COOLDOWN_MS",
    "OCHAT__STORAGE__CREDENTIALS_PATH",
];

struct TestContext {
    vars: Vec<(String, Option<String>)>,
    original_dir: Option<PathBuf>,
}

impl TestContext {
    fn new() -> Self {
        Self {
            vars: Vec::new(),
            original_dir: None,
        }
    }

    fn reset_environment(&mut self) {
        for key in ENV_VARS_TO_RESET {
            self.remove_var(key);
        }
    }

    fn set_var(&mut self, key: &str, value: impl AsRef<str>) {
        let previous = std::env::var(key).ok();
        std::env::set_var(key, value.as_ref());
        self.vars.push((key.to_string(), previous));
    }

    fn remove_var(&mut self, key: &str) {
        let previous = std::env::var(key).ok();
        std::env::remove_var(key);
        self.vars.push((key.to_string(), previous));
    }

    fn set_current_dir(&mut self, dir: &Path) {
        if self.original_dir.is_none() {
            self.original_dir =
                Some(std::env::current_dir().expect("failed to capture current directory"));
        }
        std::env::set_current_dir(dir).expect("failed to set current directory");
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(original) = self.original_dir.take() {
            let _ = std::env::set_current_dir(original);
        }

        while let Some((key, value)) = self.vars.pop() {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }
    }
}

fn write_config_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create config directories");
    }
    fs::write(path, contents).expect("failed to write config file");
}

#[test]
#[serial]
fn load_uses_default_values_when_no_files_found() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    let config = load().expect("configuration load should succeed without files");
    let defaults = ClientConfig::default();

    assert_eq!(config.api.base_url, defaults.api.base_url);
    assert_eq!(config.api.chat_base_url, defaults.api.chat_base_url);
    assert_eq!(
        config.api.request_timeout_seconds,
        defaults.api.request_timeout_seconds
    );
    assert_eq!(config.realtime.hub_url, defaults.realtime.hub_url);
    assert_eq!(
        config.realtime.reconnect.max_retries,
        defaults.realtime.reconnect.max_retries
    );
    assert_eq!(
        config.notifications.cooldown_ms,
        defaults.notifications.cooldown_ms
    );
    assert_eq!(
        config.storage.credentials_path,
        defaults.storage.credentials_path
    );
}

#[test]
#[serial]
fn load_picks_first_available_file_in_search_order() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "ochat.toml",
        r#"
        [realtime]
        hub_url = "ws://first.test/chathub"
        "#,
    );
    write_config_file(
        temp_dir.path(),
        "config/ochat.toml",
        r#"
        [realtime]
        hub_url = "ws://second.test/chathub"
        "#,
    );

    let config = load().expect("configuration load should pick the first file");
    assert_eq!(config.realtime.hub_url, "ws://first.test/chathub");
}

#[test]
#[serial]
fn load_merges_partial_file_with_defaults() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "ochat.toml",
        r#"
        [api]
        request_timeout_seconds = 5

        [realtime.reconnect]
        max_retries = 3
        "#,
    );

    let config = load().expect("configuration load should succeed");
    let defaults = ClientConfig::default();

    assert_eq!(config.api.request_timeout_seconds, 5);
    assert_eq!(config.api.base_url, defaults.api.base_url);
    assert_eq!(config.realtime.reconnect.max_retries, 3);
    assert_eq!(
        config.realtime.reconnect.initial_delay_ms,
        defaults.realtime.reconnect.initial_delay_ms
    );
    assert_eq!(
        config.realtime.invoke_timeout_seconds,
        defaults.realtime.invoke_timeout_seconds
    );
}

#[test]
#[serial]
fn load_applies_environment_overrides() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "ochat.toml",
        r#"
        [notifications]
        cooldown_ms = 1000
        "#,
    );

    ctx.set_var("OCHAT__NOTIFICATIONS__COOLDOWN_MS", "2500");
    ctx.set_var("OCHAT__REALTIME__HUB_URL", "ws://env.test/chathub");

    let config = load().expect("configuration load should honour env overrides");
    assert_eq!(config.notifications.cooldown_ms, 2500);
    assert_eq!(config.realtime.hub_url, "ws://env.test/chathub");
}

#[test]
#[serial]
fn load_reads_explicit_config_path() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "elsewhere/custom.toml",
        r#"
        [storage]
        credentials_path = "/tmp/ochat-test/creds.json"
        "#,
    );
    let path = temp_dir.path().join("elsewhere/custom.toml");
    ctx.set_var("OCHAT_CONFIG", path.display().to_string());

    let config = load().expect("configuration load should read OCHAT_CONFIG");
    assert_eq!(config.storage.credentials_path, "/tmp/ochat-test/creds.json");
}

#[test]
#[serial]
fn load_raises_zero_refresh_queue_capacity_to_one() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    ctx.set_var("OCHAT__API__REFRESH_QUEUE_CAPACITY", "0");

    let config = load().expect("configuration load should succeed");
    assert_eq!(config.api.refresh_queue_capacity, 1);
}

#[test]
#[serial]
fn load_errors_on_invalid_toml_contents() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "ochat.toml",
        r#"
        [api]
        request_timeout_seconds = "not-a-number
        "#,
    );

    let error = load().expect_err("invalid TOML should cause load to fail");
    let message = error.to_string();
    assert!(
        message.contains("invalid configuration") || message.contains("unable to build configuration"),
        "unexpected error message: {message}"
    );
}

#[test]
fn api_config_defaults_expose_timeout_duration() {
    let defaults = ApiConfig::default();
    assert_eq!(defaults.request_timeout(), Duration::from_secs(30));
    assert_eq!(defaults.current_domain, "localhost");
    assert!(defaults.client.is_empty());
}

#[test]
fn realtime_config_defaults_match_expected_timings() {
    let defaults = RealtimeConfig::default();
    assert_eq!(defaults.invoke_timeout(), Duration::from_secs(15));
    assert_eq!(defaults.keep_alive(), Duration::from_secs(15));
    assert_eq!(defaults.rejoin_grace(), Duration::from_secs(10));
}

#[test]
fn reconnect_delay_doubles_until_capped() {
    let policy = ReconnectConfig {
        initial_delay_ms: 100,
        max_delay_secs: 1,
        max_retries: 5,
    };

    assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
    assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(1));
    assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(1));
}
