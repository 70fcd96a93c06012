//! Per-endpoint polling scheduler.
//!
//! Each endpoint gets its own scheduler that runs one poll cycle per tick.
//! There is no retry inside a tick: a failed cycle leaves the watermark where
//! it was, so the next tick plans the same window again.

use gridpoll::{Clock, PollOutcome, PollResult, Poller, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Status information for one endpoint.
#[derive(Clone, Debug, Default)]
pub struct EndpointStatus {
    /// Last time a cycle finished, whatever the result
    pub last_poll: Option<Timestamp>,
    /// Last time a cycle committed
    pub last_success: Option<Timestamp>,
    /// Last error message (cleared by the next success or no-op)
    pub last_error: Option<String>,
    /// Records committed by the last successful cycle
    pub last_records: u64,
    /// Number of committed cycles
    pub poll_count: u64,
    /// Number of cycles with nothing new to fetch
    pub noop_count: u64,
    /// Number of failed cycles
    pub error_count: u64,
}

impl EndpointStatus {
    fn record(&mut self, outcome: &PollOutcome, now: Timestamp) {
        self.last_poll = Some(now);
        match &outcome.result {
            PollResult::Success => {
                self.last_success = Some(now);
                self.last_error = None;
                self.last_records = outcome.record_count;
                self.poll_count += 1;
            }
            PollResult::NoOp => {
                self.last_error = None;
                self.noop_count += 1;
            }
            PollResult::Failure { phase, error } => {
                self.last_error = Some(format!("{} failed: {}", phase, error));
                self.error_count += 1;
            }
        }
    }
}

/// Runs one endpoint's poller on a fixed interval.
pub struct EndpointScheduler {
    poller: Arc<Poller>,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
    status: Arc<tokio::sync::Mutex<EndpointStatus>>,
}

impl EndpointScheduler {
    /// `clock` stamps the status; pass the one the poller plans with.
    pub fn new(poller: Arc<Poller>, poll_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            poller,
            poll_interval,
            clock,
            status: Arc::new(tokio::sync::Mutex::new(EndpointStatus::default())),
        }
    }

    /// Returns a clone of the status tracker for external monitoring.
    pub fn status(&self) -> Arc<tokio::sync::Mutex<EndpointStatus>> {
        Arc::clone(&self.status)
    }

    /// Runs a single cycle and folds its outcome into the status.
    pub async fn tick(&self) -> PollOutcome {
        let outcome = self.poller.run_once().await;
        self.status.lock().await.record(&outcome, self.clock.now());

        if let Some((_, error)) = outcome.error() {
            if !error.is_retryable() {
                warn!(
                    endpoint = %outcome.endpoint_id,
                    error = %error,
                    "Failure will repeat on every tick until an operator intervenes"
                );
            }
        }
        outcome
    }

    /// Starts the polling loop (non-blocking).
    ///
    /// The first tick fires immediately. Ticks missed while a slow cycle was
    /// running are skipped, so cycles for one endpoint never overlap.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let endpoint_id = self.poller.endpoint().id.clone();

        tokio::spawn(async move {
            info!(
                endpoint = %endpoint_id,
                interval_secs = self.poll_interval.as_secs(),
                "Starting endpoint scheduler"
            );

            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                debug!(endpoint = %endpoint_id, "Polling endpoint");
                self.tick().await;
            }
        })
    }
}
