//! Request pipeline shared by every endpoint.

use std::sync::Arc;

use ochat_auth::{Credentials, SharedCredentialStore};
use ochat_config::{ApiConfig, NotificationConfig};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::notifier::ErrorNotifier;
use crate::refresh::{RefreshCoordinator, RefreshTicket};
use crate::session::{RefreshResponse, SessionEvent};

const SESSION_EVENT_BUFFER: usize = 16;

/// A request that can be replayed after a token refresh.
#[derive(Debug, Clone)]
pub(crate) struct ApiRequest {
    method: Method,
    url: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl ApiRequest {
    pub(crate) fn get(url: String) -> Self {
        Self {
            method: Method::GET,
            url,
            query: Vec::new(),
            body: None,
        }
    }

    pub(crate) fn post<T: Serialize>(url: String, body: &T) -> GatewayResult<Self> {
        Ok(Self {
            method: Method::POST,
            url,
            query: Vec::new(),
            body: Some(serde_json::to_value(body)?),
        })
    }

    pub(crate) fn post_empty(url: String) -> Self {
        Self {
            method: Method::POST,
            url,
            query: Vec::new(),
            body: None,
        }
    }

    pub(crate) fn query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// Typed client for the accounts and chat APIs.
///
/// Cheap to clone; clones share the HTTP pool, the refresh coordinator and
/// the notifier.
#[derive(Clone)]
pub struct RestGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    http: Client,
    config: ApiConfig,
    credentials: SharedCredentialStore,
    refresh: RefreshCoordinator,
    notifier: ErrorNotifier,
    session_events: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for RestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestGateway")
            .field("base_url", &self.inner.config.base_url)
            .field("chat_base_url", &self.inner.config.chat_base_url)
            .finish_non_exhaustive()
    }
}

impl RestGateway {
    pub fn new(
        config: ApiConfig,
        notifications: &NotificationConfig,
        credentials: SharedCredentialStore,
    ) -> GatewayResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let (session_events, _) = broadcast::channel(SESSION_EVENT_BUFFER);

        Ok(Self {
            inner: Arc::new(GatewayInner {
                http,
                refresh: RefreshCoordinator::new(config.refresh_queue_capacity),
                config,
                credentials,
                notifier: ErrorNotifier::new(notifications.cooldown()),
                session_events,
            }),
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &SharedCredentialStore {
        &self.inner.credentials
    }

    pub fn notifier(&self) -> &ErrorNotifier {
        &self.inner.notifier
    }

    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.session_events.subscribe()
    }

    pub(crate) fn publish_session(&self, event: SessionEvent) {
        let _ = self.inner.session_events.send(event);
    }

    pub(crate) fn accounts_url(&self, path: &str) -> String {
        join_url(&self.inner.config.base_url, path)
    }

    pub(crate) fn chat_url(&self, path: &str) -> String {
        join_url(&self.inner.config.chat_base_url, path)
    }

    pub(crate) async fn load_credentials(&self) -> GatewayResult<Credentials> {
        Ok(self.inner.credentials.credentials().await?)
    }

    /// Send with bearer and tenant headers, refreshing at most once on 401.
    pub(crate) async fn send_authorized(&self, request: &ApiRequest) -> GatewayResult<String> {
        let result = self.authorized_round_trip(request).await;
        if let Err(err) = &result {
            warn!(url = %request.url, error = %err, "authorized request failed");
            self.inner.notifier.report(err);
        }
        result
    }

    /// Send without credentials and without the refresh retry.
    pub(crate) async fn send_public(&self, request: &ApiRequest) -> GatewayResult<String> {
        let result = match self.dispatch(request, None, None).await {
            Ok(response) => read_body(response).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            warn!(url = %request.url, error = %err, "request failed");
            self.inner.notifier.report(err);
        }
        result
    }

    async fn authorized_round_trip(&self, request: &ApiRequest) -> GatewayResult<String> {
        let credentials = self.load_credentials().await?;
        let token = credentials.access_token.clone();

        let response = self
            .dispatch(request, Some(&credentials), token.as_deref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return read_body(response).await;
        }

        debug!(url = %request.url, "request unauthorized, renewing access token");
        let fresh = self.renew_access_token(token.as_deref()).await?;

        let credentials = self.load_credentials().await?;
        let response = self
            .dispatch(request, Some(&credentials), Some(&fresh))
            .await?;
        // a second 401 is reported as a plain status failure
        read_body(response).await
    }

    async fn renew_access_token(&self, rejected: Option<&str>) -> GatewayResult<String> {
        let current = self.load_credentials().await?.access_token;
        if let Some(current) = current {
            if rejected != Some(current.as_str()) {
                debug!("access token already replaced, replaying request");
                return Ok(current);
            }
        }

        match self.inner.refresh.enter(rejected)? {
            RefreshTicket::Replay(token) => Ok(token),
            RefreshTicket::Wait(outcome) => outcome
                .await
                .unwrap_or(Err(GatewayError::RefreshCancelled)),
            RefreshTicket::Lead(lease) => {
                let outcome = self.refresh_tokens().await;
                lease.complete(&outcome);
                outcome
            }
        }
    }

    async fn refresh_tokens(&self) -> GatewayResult<String> {
        let Some(refresh_token) = self.load_credentials().await?.refresh_token else {
            warn!("no refresh token stored");
            return Err(self.expire_session().await);
        };

        let url = format!(
            "{}?refreshToken={}",
            self.accounts_url("User/refresh-token"),
            urlencoding::encode(&refresh_token)
        );
        let response = self.inner.http.post(url).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("refresh token rejected");
            return Err(self.expire_session().await);
        }

        let body = read_body(response).await?;
        let tokens: RefreshResponse = decode(&body)?;
        self.inner
            .credentials
            .save_tokens(&tokens.access_token, tokens.refresh_token.as_deref())
            .await?;

        info!("access token refreshed");
        Ok(tokens.access_token)
    }

    /// Forced session reset: forget credentials and tell the runtime.
    async fn expire_session(&self) -> GatewayError {
        if let Err(err) = self.inner.credentials.clear().await {
            error!(error = %err, "failed to clear credentials after session expiry");
        }
        self.publish_session(SessionEvent::Expired);
        GatewayError::AuthExpired
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        credentials: Option<&Credentials>,
        token: Option<&str>,
    ) -> GatewayResult<Response> {
        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), &request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(token) = token {
            builder = builder.bearer_auth(token);
            if let Some(credentials) = credentials {
                if let Some(company_id) = credentials.company_id() {
                    builder = builder.header("CompanyId", company_id.to_string());
                }
                if let Some(workspace_id) = credentials.workspace_id() {
                    builder = builder.header("WorkspaceId", workspace_id.to_string());
                }
            }
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %request.url, "sending request");
        Ok(builder.send().await?)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

async fn read_body(response: Response) -> GatewayResult<String> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }

    Err(GatewayError::Status {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

pub(crate) fn decode<T: DeserializeOwned>(body: &str) -> GatewayResult<T> {
    Ok(serde_json::from_str(body)?)
}

/// Empty or `null` bodies decode as `None`.
pub(crate) fn decode_optional<T: DeserializeOwned>(body: &str) -> GatewayResult<Option<T>> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    decode(trimmed).map(Some)
}

pub(crate) fn decode_list<T: DeserializeOwned>(body: &str) -> GatewayResult<Vec<T>> {
    Ok(decode_optional(body)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url_normalises_slashes() {
        assert_eq!(
            join_url("https://api.example.com/api/", "/User/Login"),
            "https://api.example.com/api/User/Login"
        );
        assert_eq!(
            join_url("https://api.example.com/api", "User/Login"),
            "https://api.example.com/api/User/Login"
        );
    }

    #[test]
    fn test_error_message_prefers_json_message() {
        assert_eq!(error_message(r#"{"message":"nope"}"#), "nope");
        assert_eq!(error_message(" plain text "), "plain text");
        assert_eq!(error_message(""), "");
    }

    #[test]
    fn test_decode_list_accepts_empty_bodies() {
        assert!(decode_list::<i64>("").unwrap().is_empty());
        assert!(decode_list::<i64>("null").unwrap().is_empty());
        assert_eq!(decode_list::<i64>("[1,2]").unwrap(), vec![1, 2]);
    }
}
