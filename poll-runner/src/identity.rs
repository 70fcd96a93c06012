//! Resource-owner password token exchange.

use async_trait::async_trait;
use gridpoll::{ClientCredentials, IdentityProvider, IssuedToken, PollError};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Token response from the identity provider's token endpoint.
#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Exchanges a username and password for a bearer token (ROPC flow).
///
/// POSTs a form with `grant_type=password` to the configured token URL. The
/// lifetime comes from `expires_in` when the provider sends it, otherwise
/// from `default_ttl`.
pub struct RopcIdentityProvider {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    default_ttl: chrono::Duration,
}

impl RopcIdentityProvider {
    pub fn new(token_url: String, client_id: String, default_ttl: chrono::Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            token_url,
            client_id,
            default_ttl,
        }
    }

    fn form(&self, credentials: &ClientCredentials) -> HashMap<&'static str, String> {
        let mut form = HashMap::new();
        form.insert("username", credentials.username.clone());
        form.insert("password", credentials.password.clone());
        form.insert("grant_type", "password".to_string());
        form.insert("scope", format!("openid {} offline_access", self.client_id));
        form.insert("client_id", self.client_id.clone());
        form.insert("response_type", "id_token".to_string());
        form
    }
}

#[async_trait]
impl IdentityProvider for RopcIdentityProvider {
    async fn exchange(&self, credentials: &ClientCredentials) -> Result<IssuedToken, PollError> {
        info!(username = %credentials.username, "Requesting access token");

        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&self.form(credentials))
            .send()
            .await
            .map_err(|e| PollError::Auth(format!("failed to send token request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(PollError::Auth(format!(
                "token exchange failed with status {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PollError::Auth(format!("failed to parse token response: {}", e)))?;

        let value = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PollError::Auth("token response has no access_token".to_string()))?;

        let nominal_ttl = token
            .expires_in
            .filter(|secs| *secs > 0)
            .map(chrono::Duration::seconds)
            .unwrap_or(self.default_ttl);
        debug!(ttl_secs = nominal_ttl.num_seconds(), "Access token issued");

        Ok(IssuedToken { value, nominal_ttl })
    }
}
