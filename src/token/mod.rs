//! Access-token lifecycle.
//!
//! The [`TokenManager`] is a process-lifetime service object: build it once,
//! wrap it in an `Arc` and hand it to every poller that talks to the same
//! identity provider.
//!
//! # Refresh model
//!
//! ```text
//!   ensure_valid() ──► lock ──► cached && now < expires_at ? ──► clone, unlock
//!                                  │ no
//!                                  ▼
//!                      IdentityProvider::exchange (bounded timeout)
//!                                  │
//!                     ok ──► replace cached token wholesale
//!                     err ─► keep prior state, return PollError::Auth
//! ```
//!
//! The lock is held across the exchange, so at most one refresh is in flight.
//! Callers queued behind it wake up to its result: the fresh token, or the
//! same AuthError when it failed. Only a call that starts after a failed
//! attempt has finished exchanges again.

use crate::clock::{Clock, Timestamp};
use crate::error::PollError;
use async_trait::async_trait;
use chrono::Duration;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};


/// Identity + secret used for the token exchange. Opaque to the core.
#[derive(Clone)]
pub struct ClientCredentials {
    pub username: String,
    pub password: String,
}

impl ClientCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Token as handed out by the identity provider.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub value: String,
    /// Lifetime the provider advertises for the token.
    pub nominal_ttl: Duration,
}

/// Cached bearer token.
///
/// `expires_at` already has the safety buffer subtracted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
}

impl AccessToken {
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

/// Exchanges credentials for a bearer token.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange(&self, credentials: &ClientCredentials) -> Result<IssuedToken, PollError>;
}

/// Guarantees a valid bearer token before every request.
pub struct TokenManager {
    provider: Arc<dyn IdentityProvider>,
    credentials: ClientCredentials,
    clock: Arc<dyn Clock>,
    safety_buffer: Duration,
    exchange_timeout: std::time::Duration,
    current: Mutex<Cached>,
    /// Number of finished exchange attempts; only bumped under `current`.
    attempts: AtomicU64,
}

#[derive(Default)]
struct Cached {
    token: Option<AccessToken>,
    /// Attempt number and message of the last failed exchange.
    last_failure: Option<(u64, String)>,
}

impl TokenManager {
    /// Creates a manager with no cached token; the first call exchanges.
    ///
    /// # Arguments
    /// * `safety_buffer` - Subtracted from the provider's nominal expiry
    /// * `exchange_timeout` - Upper bound for one exchange round-trip
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        credentials: ClientCredentials,
        clock: Arc<dyn Clock>,
        safety_buffer: Duration,
        exchange_timeout: std::time::Duration,
    ) -> Self {
        Self {
            provider,
            credentials,
            clock,
            safety_buffer,
            exchange_timeout,
            current: Mutex::new(Cached::default()),
            attempts: AtomicU64::new(0),
        }
    }

    /// Returns a token that is valid right now, refreshing if needed.
    ///
    /// # Errors
    /// * `PollError::Auth` - exchange failed or timed out; cached state is
    ///   left as it was so the next call retries. Callers that were already
    ///   waiting on that exchange get the same error back.
    pub async fn ensure_valid(&self) -> Result<AccessToken, PollError> {
        let seen = self.attempts.load(Ordering::SeqCst);
        let mut cached = self.current.lock().await;

        let now = self.clock.now();
        if let Some(token) = cached.token.as_ref() {
            if token.is_valid_at(now) {
                return Ok(token.clone());
            }
            debug!(expires_at = %token.expires_at, "Access token expired, refreshing");
        } else {
            debug!("No access token cached, exchanging credentials");
        }

        // An attempt finished while we were queued and it failed
        if let Some((attempt, message)) = cached.last_failure.as_ref() {
            if *attempt > seen {
                debug!(attempt = *attempt, "Reusing result of the failed in-flight exchange");
                return Err(PollError::Auth(message.clone()));
            }
        }

        let result = match tokio::time::timeout(
            self.exchange_timeout,
            self.provider.exchange(&self.credentials),
        )
        .await
        {
            Ok(result) => result.map_err(|e| match e {
                PollError::Auth(_) => e,
                other => PollError::Auth(other.to_string()),
            }),
            Err(_) => Err(PollError::Auth(format!(
                "token exchange timed out after {}s",
                self.exchange_timeout.as_secs()
            ))),
        };
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        match result {
            Ok(issued) => {
                let token = self.build_token(issued);
                info!(expires_at = %token.expires_at, "Access token refreshed");
                cached.token = Some(token.clone());
                cached.last_failure = None;
                Ok(token)
            }
            Err(PollError::Auth(message)) => {
                warn!(attempt = attempt, error = %message, "Token exchange failed");
                cached.last_failure = Some((attempt, message.clone()));
                Err(PollError::Auth(message))
            }
            Err(other) => Err(other),
        }
    }

    /// Drops the cached token if it is the one the API rejected.
    ///
    /// A token refreshed meanwhile by another caller is kept.
    pub async fn invalidate(&self, rejected: &str) {
        let mut cached = self.current.lock().await;
        if cached.token.as_ref().is_some_and(|t| t.value == rejected) {
            cached.token = None;
            warn!("Access token rejected by the API, invalidated");
        }
    }

    /// Returns the cached token, valid or not, without refreshing.
    pub async fn current(&self) -> Option<AccessToken> {
        self.current.lock().await.token.clone()
    }

    fn build_token(&self, issued: IssuedToken) -> AccessToken {
        // Re-read the clock: the exchange itself may have taken a while.
        let issued_at = self.clock.now();
        let mut lifetime = issued.nominal_ttl - self.safety_buffer;
        if lifetime < Duration::zero() {
            warn!(
                nominal_ttl_secs = issued.nominal_ttl.num_seconds(),
                safety_buffer_secs = self.safety_buffer.num_seconds(),
                "Token lifetime shorter than safety buffer, it will be refreshed on every use"
            );
            lifetime = Duration::zero();
        }
        let expires_at = issued_at
            .checked_add_signed(lifetime)
            .unwrap_or(issued_at);

        AccessToken {
            value: issued.value,
            issued_at,
            expires_at,
        }
    }
}
