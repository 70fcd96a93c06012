//! HTTP client for the public reports API.

use async_trait::async_trait;
use gridpoll::{AccessToken, ApiClient, PollError};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the API subscription key.
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Authenticates with a Bearer token plus the subscription key header.
pub struct HttpApiClient {
    http_client: reqwest::Client,
    base_url: String,
    subscription_key: String,
    request_timeout: Duration,
}

impl HttpApiClient {
    pub fn new(base_url: String, subscription_key: String, request_timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            subscription_key,
            request_timeout,
        }
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn query(
        &self,
        token: &AccessToken,
        endpoint: &str,
        params: &HashMap<String, String>,
    ) -> Result<Value, PollError> {
        let url = self.url_for(endpoint);
        debug!(url = %url, params = ?params, "Querying endpoint");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token.value)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .query(params)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| PollError::Transport(format!("request to {} failed: {}", url, e)))?;

        check_response_status(response)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| PollError::Transport(format!("failed to read response body: {}", e)))
    }
}

/// Maps a non-2xx response to the error taxonomy.
///
/// - 401 → retryable Http error (caller invalidates the token)
/// - 408, 429, 5xx → retryable Http error
/// - Other 4xx → Config error, needs operator attention
async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response, PollError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        warn!(retry_after = %retry_after, "Rate limited by the API");
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read body>".to_string());
    Err(PollError::from_status(status.as_u16(), body))
}
