//! Accounts API: session flow and the employee directory.

use ochat_chats::{Employee, UserProfile};
use serde_json::json;
use tracing::info;

use crate::client::{decode, decode_list, ApiRequest, RestGateway};
use crate::error::{GatewayError, GatewayResult};
use crate::session::{GrantResponse, LoginRequest, LoginResponse, SessionEvent};

impl RestGateway {
    /// Log in with email and password, then exchange the grant token for a
    /// session. Tokens and profile end up in the credential store.
    pub async fn login(&self, email: &str, password: &str) -> GatewayResult<UserProfile> {
        let config = self.config();
        let request = ApiRequest::post(
            self.accounts_url("User/Login"),
            &LoginRequest {
                email,
                password,
                current_domain: &config.current_domain,
                client: &config.client,
            },
        )?;

        let body = self.send_public(&request).await?;
        let response: LoginResponse = decode(&body)?;
        let grant_token = response
            .grant_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| GatewayError::Decode("grant token not received".to_string()))?;

        self.credentials().save_grant_token(&grant_token).await?;
        self.exchange_grant(&grant_token).await
    }

    /// Exchange a grant token for access/refresh tokens and the user profile.
    pub async fn exchange_grant(&self, grant_token: &str) -> GatewayResult<UserProfile> {
        let request = ApiRequest::post_empty(self.accounts_url("User/Grant"))
            .query([("grantToken", grant_token)]);

        let body = self.send_public(&request).await?;
        let grant: GrantResponse = decode(&body)?;
        let token = grant
            .token
            .ok_or_else(|| GatewayError::Decode("grant response has no token".to_string()))?;
        let profile = grant
            .user
            .ok_or_else(|| GatewayError::Decode("grant response has no user".to_string()))?;

        let credentials = self.credentials();
        credentials
            .save_tokens(&token, grant.refresh_token.as_deref())
            .await?;
        credentials.save_profile(&profile).await?;

        info!(user_id = profile.id, "signed in");
        self.publish_session(SessionEvent::SignedIn(profile.clone()));
        Ok(profile)
    }

    pub async fn logout(&self) -> GatewayResult<()> {
        self.credentials().clear().await?;
        info!("signed out");
        self.publish_session(SessionEvent::SignedOut);
        Ok(())
    }

    pub async fn list_employees(&self) -> GatewayResult<Vec<Employee>> {
        let request = ApiRequest::get(self.accounts_url("Employee/GetAll"));
        let body = self.send_authorized(&request).await?;
        decode_list(&body)
    }

    pub async fn employee_profile(&self) -> GatewayResult<Employee> {
        let request = ApiRequest::post(self.accounts_url("Employee/GetProfile"), &json!({}))?;
        let body = self.send_authorized(&request).await?;
        decode(&body)
    }
}
