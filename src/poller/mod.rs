//! Poll-cycle orchestration.
//!
//! One [`Poller`] drives one endpoint through a short sequential pipeline:
//!
//! ```text
//! IDLE ─► PLANNING ─┬─► NO_OP ─────────────────────────────────────────► IDLE
//!                   └─► FETCHING ─┬─► FETCH_FAILED ────────────────────► IDLE
//!                                 └─► PERSISTING ─┬─► PERSIST_FAILED ──► IDLE
//!                                                 └─► COMMITTING ──────► IDLE
//! ```
//!
//! # Guarantees
//! - Planning re-reads the persisted watermark every cycle.
//! - A NO_OP window returns before authentication or any network call.
//! - The watermark moves only after the payload is persisted. A crash between
//!   persist and commit re-delivers that one window on the next cycle; that is
//!   the only duplication the pipeline allows.
//! - Nothing retries internally. The caller schedules the next `run_once`.

use crate::clock::{Clock, Timestamp};
use crate::collaborator::{ApiClient, LocationHint, ResultSink};
use crate::endpoint::EndpointSpec;
use crate::error::{Phase, PollError};
use crate::token::TokenManager;
use crate::watermark::{Watermark, WatermarkStore};
use crate::window::{plan, TimeWindow};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

mod outcome;


pub use outcome::{PollOutcome, PollResult};

/// Where a poller currently is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Planning,
    NoOp,
    Fetching,
    FetchFailed,
    Persisting,
    PersistFailed,
    Committing,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollState::Idle => "IDLE",
            PollState::Planning => "PLANNING",
            PollState::NoOp => "NO_OP",
            PollState::Fetching => "FETCHING",
            PollState::FetchFailed => "FETCH_FAILED",
            PollState::Persisting => "PERSISTING",
            PollState::PersistFailed => "PERSIST_FAILED",
            PollState::Committing => "COMMITTING",
        };
        f.write_str(name)
    }
}

/// Incremental poller for a single endpoint.
pub struct Poller {
    endpoint: EndpointSpec,
    tokens: Arc<TokenManager>,
    client: Arc<dyn ApiClient>,
    sink: Arc<dyn ResultSink>,
    store: Arc<dyn WatermarkStore>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    state: Arc<Mutex<PollState>>,
}

/// Puts the poller back to IDLE however the cycle ends, including when the
/// `run_once` future is dropped mid-flight.
struct IdleOnDrop(Arc<Mutex<PollState>>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            *state = PollState::Idle;
        }
    }
}

impl Poller {
    /// Creates a poller.
    ///
    /// # Arguments
    /// * `tokens` - Shared token service; one instance per identity provider
    /// * `request_timeout` - Upper bound for one API query
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: EndpointSpec,
        tokens: Arc<TokenManager>,
        client: Arc<dyn ApiClient>,
        sink: Arc<dyn ResultSink>,
        store: Arc<dyn WatermarkStore>,
        clock: Arc<dyn Clock>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            tokens,
            client,
            sink,
            store,
            clock,
            request_timeout,
            state: Arc::new(Mutex::new(PollState::Idle)),
        }
    }

    pub fn endpoint(&self) -> &EndpointSpec {
        &self.endpoint
    }

    pub fn state(&self) -> PollState {
        *self.state.lock().unwrap()
    }

    /// Current progress snapshot, read from the store.
    pub fn status(&self) -> Result<Option<Watermark>, PollError> {
        self.store.load(&self.endpoint.id)
    }

    /// Irreversibly clears the persisted watermark.
    ///
    /// The next cycle behaves like a first run. Returns whether a record existed.
    pub fn reset(&self) -> Result<bool, PollError> {
        warn!(endpoint = %self.endpoint.id, "Resetting watermark");
        self.store.reset(&self.endpoint.id)
    }

    /// Window the next cycle would request if it ran now. No side effects.
    pub fn next_window(&self) -> Result<TimeWindow, PollError> {
        let last = self.store.load(&self.endpoint.id)?;
        Ok(self.plan_from(last.as_ref(), self.clock.now()))
    }

    /// Executes exactly one cycle.
    pub async fn run_once(&self) -> PollOutcome {
        let _idle = IdleOnDrop(Arc::clone(&self.state));
        let outcome = self.cycle().await;

        match &outcome.result {
            PollResult::Success => info!(
                endpoint = %self.endpoint.id,
                window = %display_window(&outcome.window),
                records = outcome.record_count,
                "Poll cycle committed"
            ),
            PollResult::NoOp => info!(
                endpoint = %self.endpoint.id,
                window = %display_window(&outcome.window),
                "No new time range to query"
            ),
            PollResult::Failure { phase, error } => error!(
                endpoint = %self.endpoint.id,
                window = %display_window(&outcome.window),
                phase = %phase,
                retryable = error.is_retryable(),
                error = %error,
                "Poll cycle aborted"
            ),
        }

        outcome
    }

    async fn cycle(&self) -> PollOutcome {
        let id = self.endpoint.id.clone();

        // PLANNING
        self.transition(PollState::Planning);
        let last = match self.store.load(&id) {
            Ok(last) => last,
            Err(e) => return PollOutcome::failed(id, None, Phase::Planning, e),
        };
        let now = self.clock.now();
        let window = self.plan_from(last.as_ref(), now);

        if window.is_noop() {
            self.transition(PollState::NoOp);
            return PollOutcome::noop(id, window);
        }
        debug!(
            endpoint = %id,
            first_run = last.is_none(),
            window = %window,
            window_secs = window.duration().num_seconds(),
            "Planned window"
        );

        // FETCHING
        self.transition(PollState::Fetching);
        let token = match self.tokens.ensure_valid().await {
            Ok(token) => token,
            Err(e) => {
                self.transition(PollState::FetchFailed);
                return PollOutcome::failed(id, Some(window), Phase::Authenticating, e);
            }
        };

        let params = self.query_params(&window);
        let query = self.client.query(&token, &self.endpoint.path, &params);
        let payload = match tokio::time::timeout(self.request_timeout, query).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                if e.is_unauthorized() {
                    self.tokens.invalidate(&token.value).await;
                }
                self.transition(PollState::FetchFailed);
                return PollOutcome::failed(id, Some(window), Phase::Fetching, e);
            }
            Err(_) => {
                self.transition(PollState::FetchFailed);
                let e = PollError::Transport(format!(
                    "query timed out after {}s",
                    self.request_timeout.as_secs()
                ));
                return PollOutcome::failed(id, Some(window), Phase::Fetching, e);
            }
        };

        // PERSISTING
        self.transition(PollState::Persisting);
        let hint = LocationHint {
            endpoint_id: id.clone(),
            prefix: self.endpoint.output_prefix().to_string(),
            window,
        };
        let record_count = match self.sink.persist(&payload, &hint).await {
            Ok(count) => count,
            Err(e) => {
                self.transition(PollState::PersistFailed);
                return PollOutcome::failed(id, Some(window), Phase::Persisting, e);
            }
        };

        // COMMITTING: no await point from here on.
        self.transition(PollState::Committing);
        if let Err(e) = self
            .store
            .commit(&id, window.to, record_count, self.clock.now())
        {
            error!(
                endpoint = %id,
                window = %window,
                "Payload persisted but watermark not advanced, window will be fetched again"
            );
            let mut outcome = PollOutcome::failed(id, Some(window), Phase::Committing, e);
            outcome.record_count = record_count;
            return outcome;
        }

        PollOutcome::success(id, window, record_count)
    }

    fn plan_from(&self, last: Option<&Watermark>, now: Timestamp) -> TimeWindow {
        plan(
            last,
            now,
            self.endpoint.bootstrap_lookback(),
            self.endpoint.granularity,
        )
    }

    fn query_params(&self, window: &TimeWindow) -> HashMap<String, String> {
        let mut params: HashMap<String, String> = self
            .endpoint
            .extra_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        params.extend(window.to_params(&self.endpoint.from_param, &self.endpoint.to_param));
        params
    }

    fn transition(&self, next: PollState) {
        let mut state = self.state.lock().unwrap();
        debug!(endpoint = %self.endpoint.id, from = %*state, to = %next, "State transition");
        *state = next;
    }
}

fn display_window(window: &Option<TimeWindow>) -> String {
    window
        .map(|w| w.to_string())
        .unwrap_or_else(|| "-".to_string())
}
