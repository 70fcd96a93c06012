//! Interfaces the poller consumes but does not implement.
//!
//! The runner crate provides HTTP and filesystem implementations; tests plug
//! in in-memory fakes.

use crate::error::PollError;
use crate::token::AccessToken;
use crate::window::TimeWindow;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Authenticated request executor.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Runs one query and returns the JSON body.
    ///
    /// # Errors
    /// * `PollError::Transport` - connection failure or timeout
    /// * `PollError::Http` - retryable non-2xx (5xx, 429, 408, 401)
    /// * `PollError::Config` - permanent 4xx
    async fn query(
        &self,
        token: &AccessToken,
        endpoint: &str,
        params: &HashMap<String, String>,
    ) -> Result<Value, PollError>;
}

/// Where a payload belongs; the sink decides the concrete location.
#[derive(Clone, Debug)]
pub struct LocationHint {
    pub endpoint_id: String,
    pub prefix: String,
    pub window: TimeWindow,
}

/// Durable payload writer.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persists `payload` and returns how many records it contained.
    ///
    /// Must not return before the payload is durable.
    async fn persist(&self, payload: &Value, hint: &LocationHint) -> Result<u64, PollError>;
}
