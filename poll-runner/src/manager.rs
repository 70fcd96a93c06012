//! Poll manager - wires collaborators and owns the endpoint schedulers.
//!
//! One [`TokenManager`] is built per process and shared by every poller, so
//! all endpoints ride on the same bearer token.

use crate::client::HttpApiClient;
use crate::identity::RopcIdentityProvider;
use crate::registry::resolve_endpoints;
use crate::runners::scheduler::{EndpointScheduler, EndpointStatus};
use crate::sink::JsonFileSink;
use anyhow::{Context, Result};
use gridpoll::{
    check_endpoints, ApiClient, ClientCredentials, Clock, FileWatermarkStore, PollOutcome, Poller,
    PollerConfig, ResultSink, SystemClock, TokenManager, WatermarkStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

type StatusMap = HashMap<String, Arc<tokio::sync::Mutex<EndpointStatus>>>;

/// Secrets needed to talk to the API. Never read from the config file.
#[derive(Clone)]
pub struct Secrets {
    pub credentials: ClientCredentials,
    pub subscription_key: String,
}

/// Poll manager - orchestrates polling for every configured endpoint.
pub struct PollManager {
    pollers: Vec<Arc<Poller>>,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
    /// Shared by every poller; reported by `log_status`
    tokens: Arc<TokenManager>,
    status_map: StatusMap,
    handles: Vec<JoinHandle<()>>,
}

impl PollManager {
    /// Creates a manager over already-built pollers that share `tokens`.
    pub fn new(
        pollers: Vec<Arc<Poller>>,
        tokens: Arc<TokenManager>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pollers,
            poll_interval,
            clock,
            tokens,
            status_map: HashMap::new(),
            handles: Vec::new(),
        }
    }

    /// Builds the production wiring: ROPC token exchange, HTTP client,
    /// JSON file sink and file watermark store.
    pub fn from_config(config: &PollerConfig, secrets: Secrets) -> Result<Self> {
        config.validate()?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let provider = Arc::new(RopcIdentityProvider::new(
            config.token.token_url.clone(),
            config.token.client_id.clone(),
            config.token.nominal_ttl(),
        ));
        let tokens = Arc::new(TokenManager::new(
            provider,
            secrets.credentials,
            Arc::clone(&clock),
            config.token.safety_buffer(),
            config.token.exchange_timeout(),
        ));
        let client: Arc<dyn ApiClient> = Arc::new(HttpApiClient::new(
            config.api.base_url.clone(),
            secrets.subscription_key,
            config.api.request_timeout(),
        ));
        let sink: Arc<dyn ResultSink> = Arc::new(JsonFileSink::new(&config.output.directory));
        let store: Arc<dyn WatermarkStore> = Arc::new(
            FileWatermarkStore::new(&config.state.directory).with_context(|| {
                format!(
                    "Failed to open state directory {}",
                    config.state.directory.display()
                )
            })?,
        );

        // Configured ids may still clash with a built-in one
        let endpoints = resolve_endpoints(&config.endpoints);
        check_endpoints(&endpoints)?;

        let pollers = endpoints
            .into_iter()
            .map(|endpoint| {
                Arc::new(Poller::new(
                    endpoint,
                    Arc::clone(&tokens),
                    Arc::clone(&client),
                    Arc::clone(&sink),
                    Arc::clone(&store),
                    Arc::clone(&clock),
                    config.api.request_timeout(),
                ))
            })
            .collect::<Vec<_>>();

        info!(
            endpoint_count = pollers.len(),
            state_dir = %config.state.directory.display(),
            output_dir = %config.output.directory.display(),
            "Poll manager configured"
        );

        Ok(Self::new(pollers, tokens, clock, config.api.poll_interval()))
    }

    pub fn pollers(&self) -> &[Arc<Poller>] {
        &self.pollers
    }

    /// Looks up a poller by endpoint id.
    pub fn poller(&self, endpoint_id: &str) -> Option<&Arc<Poller>> {
        self.pollers.iter().find(|p| p.endpoint().id == endpoint_id)
    }

    /// Snapshot of every running scheduler's counters, in endpoint order.
    pub async fn statuses(&self) -> Vec<(String, EndpointStatus)> {
        let mut statuses = Vec::with_capacity(self.status_map.len());
        for poller in &self.pollers {
            let id = &poller.endpoint().id;
            if let Some(status) = self.status_map.get(id) {
                statuses.push((id.clone(), status.lock().await.clone()));
            }
        }
        statuses
    }

    /// Starts one scheduler task per endpoint.
    ///
    /// # Returns
    /// Number of schedulers started
    pub fn start(&mut self) -> usize {
        info!("Starting poll manager");

        if self.pollers.is_empty() {
            warn!("No endpoints configured, nothing to start");
            return 0;
        }

        for poller in &self.pollers {
            let scheduler = EndpointScheduler::new(
                Arc::clone(poller),
                self.poll_interval,
                Arc::clone(&self.clock),
            );
            self.status_map
                .insert(poller.endpoint().id.clone(), scheduler.status());
            self.handles.push(scheduler.start());
        }

        info!(scheduler_count = self.handles.len(), "Endpoint schedulers started");
        self.handles.len()
    }

    /// Runs exactly one cycle for every endpoint, concurrently.
    pub async fn run_once_all(&self) -> Vec<PollOutcome> {
        let tasks = self
            .pollers
            .iter()
            .map(|poller| {
                let poller = Arc::clone(poller);
                tokio::spawn(async move { poller.run_once().await })
            })
            .collect::<Vec<_>>();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Poll task panicked or was cancelled"),
            }
        }
        outcomes
    }

    /// Logs each running endpoint's counters and the shared token's expiry.
    pub async fn log_status(&self) {
        match self.tokens.current().await {
            Some(token) if token.is_valid_at(self.clock.now()) => {
                info!(expires_at = %token.expires_at, "Access token cached")
            }
            Some(token) => info!(expires_at = %token.expires_at, "Access token expired"),
            None => info!("No access token cached"),
        }

        for (id, status) in self.statuses().await {
            info!(
                endpoint = %id,
                polls = status.poll_count,
                noops = status.noop_count,
                errors = status.error_count,
                last_records = status.last_records,
                last_success = %status
                    .last_success
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "never".to_string()),
                last_error = status.last_error.as_deref().unwrap_or("none"),
                "Endpoint status"
            );
        }
    }

    /// Logs a final status summary and aborts all scheduler tasks.
    pub async fn shutdown(&mut self) {
        info!("Shutting down poll manager");
        self.log_status().await;

        let count = self.handles.len();
        if count > 0 {
            info!(scheduler_count = count, "Aborting endpoint scheduler tasks");
            for handle in self.handles.drain(..) {
                handle.abort();
            }
        }

        info!("All scheduler tasks aborted");
    }
}

impl Drop for PollManager {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}
