use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use ochat_auth::{CredentialStore, Credentials, InMemoryCredentialStore};
use ochat_chats::{
    ConversationType, MessageKind, NewConversation, NewMessage, TenantScope, UserProfile,
};
use ochat_config::{ApiConfig, NotificationConfig};
use ochat_gateway::{GatewayError, RestGateway, SessionEvent};
use serde_json::json;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

struct TestContext {
    server: MockServer,
    store: Arc<InMemoryCredentialStore>,
    gateway: RestGateway,
}

impl TestContext {
    async fn new(credentials: Credentials) -> TestResult<Self> {
        let server = MockServer::start_async().await;
        let store = Arc::new(InMemoryCredentialStore::with_credentials(credentials));
        let config = ApiConfig {
            base_url: server.url("/api/"),
            chat_base_url: server.url("/chat/"),
            request_timeout_seconds: 5,
            ..ApiConfig::default()
        };
        let gateway = RestGateway::new(
            config,
            &NotificationConfig { cooldown_ms: 4_000 },
            store.clone(),
        )?;

        Ok(Self {
            server,
            store,
            gateway,
        })
    }

    async fn signed_in(access: &str, refresh: &str) -> TestResult<Self> {
        Self::new(Credentials {
            access_token: Some(access.to_string()),
            refresh_token: Some(refresh.to_string()),
            grant_token: None,
            profile: Some(alice()),
        })
        .await
    }
}

fn alice() -> UserProfile {
    UserProfile::new(5, "Alice").with_scope(TenantScope {
        workspace_id: Some(1),
        station_id: Some(2),
        company_id: Some(3),
    })
}

#[tokio::test]
async fn authorized_requests_carry_bearer_and_tenant_headers() -> TestResult {
    let ctx = TestContext::signed_in("t1", "r1").await?;
    let employees = ctx
        .server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/Employee/GetAll")
                .header("Authorization", "Bearer t1")
                .header("CompanyId", "3")
                .header("WorkspaceId", "1");
            then.status(200)
                .json_body(json!([{ "id": 8, "name": "Bob", "email": "bob@example.com" }]));
        })
        .await;

    let result = ctx.gateway.list_employees().await?;

    employees.assert_async().await;
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].name, "Bob");
    Ok(())
}

#[tokio::test]
async fn unauthorized_request_refreshes_once_and_replays() -> TestResult {
    let ctx = TestContext::signed_in("old", "r1").await?;
    let rejected = ctx
        .server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/Employee/GetAll")
                .header("Authorization", "Bearer old");
            then.status(401);
        })
        .await;
    let accepted = ctx
        .server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/Employee/GetAll")
                .header("Authorization", "Bearer new");
            then.status(200).json_body(json!([]));
        })
        .await;
    let refresh = ctx
        .server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/User/refresh-token")
                .query_param("refreshToken", "r1");
            then.status(200)
                .json_body(json!({ "accessToken": "new", "refreshToken": "r2" }));
        })
        .await;

    ctx.gateway.list_employees().await?;

    assert_eq!(rejected.hits_async().await, 1);
    assert_eq!(accepted.hits_async().await, 1);
    assert_eq!(refresh.hits_async().await, 1);

    let stored = ctx.store.credentials().await?;
    assert_eq!(stored.access_token.as_deref(), Some("new"));
    assert_eq!(stored.refresh_token.as_deref(), Some("r2"));
    Ok(())
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() -> TestResult {
    let ctx = TestContext::signed_in("old", "r1").await?;
    ctx.server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/Employee/GetAll")
                .header("Authorization", "Bearer old");
            then.status(401);
        })
        .await;
    let accepted = ctx
        .server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/Employee/GetAll")
                .header("Authorization", "Bearer new");
            then.status(200).json_body(json!([]));
        })
        .await;
    let refresh = ctx
        .server
        .mock_async(|when, then| {
            when.method(POST).path("/api/User/refresh-token");
            then.status(200)
                .delay(Duration::from_millis(300))
                .json_body(json!({ "accessToken": "new", "refreshToken": "r2" }));
        })
        .await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let gateway = ctx.gateway.clone();
        handles.push(tokio::spawn(async move { gateway.list_employees().await }));
    }
    for handle in handles {
        assert!(handle.await?.is_ok());
    }

    assert_eq!(refresh.hits_async().await, 1);
    assert_eq!(accepted.hits_async().await, 6);
    Ok(())
}

#[tokio::test]
async fn refresh_failure_fails_every_waiter_the_same_way() -> TestResult {
    let ctx = TestContext::signed_in("old", "r1").await?;
    let mut session = ctx.gateway.subscribe_session();
    ctx.server
        .mock_async(|when, then| {
            when.method(GET).path("/api/Employee/GetAll");
            then.status(401);
        })
        .await;
    let refresh = ctx
        .server
        .mock_async(|when, then| {
            when.method(POST).path("/api/User/refresh-token");
            then.status(500)
                .delay(Duration::from_millis(300))
                .json_body(json!({ "message": "refresh backend down" }));
        })
        .await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let gateway = ctx.gateway.clone();
        handles.push(tokio::spawn(async move { gateway.list_employees().await }));
    }

    let mut errors = Vec::new();
    for handle in handles {
        errors.push(handle.await?.unwrap_err());
    }

    assert_eq!(refresh.hits_async().await, 1);
    let expected = GatewayError::Status {
        status: 500,
        message: "refresh backend down".to_string(),
    };
    assert!(errors.iter().all(|err| *err == expected));

    // a transport failure is not a session reset
    assert_eq!(
        ctx.store.credentials().await?.access_token.as_deref(),
        Some("old")
    );
    assert!(session.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_expires_the_session() -> TestResult {
    let ctx = TestContext::signed_in("old", "r1").await?;
    let mut session = ctx.gateway.subscribe_session();
    let mut notifications = ctx.gateway.notifier().subscribe();
    ctx.server
        .mock_async(|when, then| {
            when.method(GET).path("/api/Employee/GetAll");
            then.status(401);
        })
        .await;
    ctx.server
        .mock_async(|when, then| {
            when.method(POST).path("/api/User/refresh-token");
            then.status(401);
        })
        .await;

    let err = ctx.gateway.list_employees().await.unwrap_err();

    assert_eq!(err, GatewayError::AuthExpired);
    assert_eq!(ctx.store.credentials().await?, Credentials::default());
    assert_eq!(session.try_recv()?, SessionEvent::Expired);
    assert_eq!(notifications.try_recv()?.key, "unauthorized");
    Ok(())
}

#[tokio::test]
async fn second_unauthorized_after_refresh_is_not_retried() -> TestResult {
    let ctx = TestContext::signed_in("old", "r1").await?;
    let protected = ctx
        .server
        .mock_async(|when, then| {
            when.method(GET).path("/api/Employee/GetAll");
            then.status(401);
        })
        .await;
    let refresh = ctx
        .server
        .mock_async(|when, then| {
            when.method(POST).path("/api/User/refresh-token");
            then.status(200)
                .json_body(json!({ "accessToken": "new", "refreshToken": "r2" }));
        })
        .await;

    let err = ctx.gateway.list_employees().await.unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert_eq!(protected.hits_async().await, 2);
    assert_eq!(refresh.hits_async().await, 1);
    Ok(())
}

#[tokio::test]
async fn login_exchanges_grant_and_persists_session() -> TestResult {
    let ctx = TestContext::new(Credentials::default()).await?;
    let mut session = ctx.gateway.subscribe_session();
    let login = ctx
        .server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/User/Login")
                .json_body_partial(r#"{ "email": "alice@example.com", "currentDomain": "localhost" }"#);
            then.status(200).json_body(json!({ "grantToken": "g1" }));
        })
        .await;
    let grant = ctx
        .server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/User/Grant")
                .query_param("grantToken", "g1");
            then.status(200).json_body(json!({
                "token": "access",
                "refreshToken": "refresh",
                "user": { "id": 5, "name": "Alice", "workspaceId": 1, "companyId": 3 }
            }));
        })
        .await;

    let profile = ctx.gateway.login("alice@example.com", "secret").await?;

    login.assert_async().await;
    grant.assert_async().await;
    assert_eq!(profile.id, 5);

    let stored = ctx.store.credentials().await?;
    assert_eq!(stored.access_token.as_deref(), Some("access"));
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));
    assert_eq!(stored.grant_token.as_deref(), Some("g1"));
    assert_eq!(stored.company_id(), Some(3));
    assert!(matches!(session.try_recv()?, SessionEvent::SignedIn(p) if p.id == 5));

    ctx.gateway.logout().await?;
    assert!(!ctx.store.credentials().await?.is_signed_in());
    assert_eq!(session.try_recv()?, SessionEvent::SignedOut);
    Ok(())
}

#[tokio::test]
async fn login_without_grant_token_fails() -> TestResult {
    let ctx = TestContext::new(Credentials::default()).await?;
    ctx.server
        .mock_async(|when, then| {
            when.method(POST).path("/api/User/Login");
            then.status(200).json_body(json!({}));
        })
        .await;

    let err = ctx.gateway.login("alice@example.com", "secret").await.unwrap_err();
    assert!(matches!(err, GatewayError::Decode(_)));
    assert!(!ctx.store.credentials().await?.is_signed_in());
    Ok(())
}

#[tokio::test]
async fn chat_endpoints_use_the_chat_base_and_scope() -> TestResult {
    let ctx = TestContext::signed_in("t1", "r1").await?;
    let create = ctx
        .server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/Conversation/Add")
                .json_body_partial(r#"{ "title": "Alice & Bob", "type": 0, "createdBy": 5 }"#);
            then.status(200).json_body(json!({
                "id": 42, "title": "Alice & Bob", "type": 0,
                "createdDate": "2024-05-01T10:00:00"
            }));
        })
        .await;
    let list = ctx
        .server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/chat/Message/List")
                .query_param("workspaceId", "1")
                .query_param("stationId", "2")
                .query_param("companyId", "3")
                .query_param("conversationId", "42");
            then.status(200).json_body(json!([{
                "id": 7, "conversationId": 42, "senderId": 5, "sender": "Alice",
                "type": 0, "content": "hi", "status": 0, "sentAt": "2024-05-01T10:00:01Z"
            }]));
        })
        .await;
    let send = ctx
        .server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/Message/Add");
            then.status(500);
        })
        .await;

    let conversation = ctx
        .gateway
        .create_conversation(&NewConversation::new(
            &alice(),
            "Alice & Bob",
            ConversationType::Direct,
        ))
        .await?;
    assert_eq!(conversation.id, 42);

    let messages = ctx.gateway.list_messages(&alice().scope, 42).await?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, 7);

    let err = ctx
        .gateway
        .send_message(&NewMessage::new(&alice(), 42, "hi", MessageKind::Text))
        .await
        .unwrap_err();
    assert!(err.is_persistence());

    create.assert_async().await;
    list.assert_async().await;
    send.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn repeated_failures_notify_once_per_category() -> TestResult {
    let ctx = TestContext::signed_in("t1", "r1").await?;
    let mut notifications = ctx.gateway.notifier().subscribe();
    ctx.server
        .mock_async(|when, then| {
            when.method(GET).path("/chat/Conversation/List");
            then.status(404);
        })
        .await;

    for _ in 0..3 {
        assert!(ctx.gateway.list_conversations(&alice().scope).await.is_err());
    }

    assert_eq!(notifications.try_recv()?.key, "not-found");
    assert!(notifications.try_recv().is_err());
    Ok(())
}
