//! Error taxonomy for a poll cycle.
//!
//! Every failure aborts the current cycle. The core never retries on its own;
//! [`PollError::is_retryable`] tells the external scheduler whether invoking
//! the cycle again can help or whether an operator has to step in.

use std::fmt;
use thiserror::Error;

/// Failure raised by the core or by one of its collaborators.
#[derive(Debug, Error)]
pub enum PollError {
    /// Credential/token exchange failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network unreachable, connection reset or timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response that may succeed on a later attempt (5xx, 429, 408, 401).
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Permanent misconfiguration or a non-transient 4xx answer.
    #[error("configuration error: {0}")]
    Config(String),

    /// Local persistence failed (payload or watermark write).
    #[error("storage error: {0}")]
    Storage(String),

    /// Persisted watermark record is unreadable or corrupt.
    #[error("watermark for '{endpoint_id}' is unreadable ({reason}); run reset to clear it")]
    RecoverableState { endpoint_id: String, reason: String },
}

impl PollError {
    /// Classifies a non-2xx HTTP status.
    ///
    /// 5xx, 429 and 408 are transient. 401 is kept as an HTTP error so the
    /// caller can drop its cached token; every other 4xx is a configuration
    /// problem that retrying will not fix.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 408 | 429 | 500..=599 => PollError::Http { status, message },
            400..=499 => PollError::Config(format!("HTTP {}: {}", status, message)),
            _ => PollError::Http { status, message },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PollError::Auth(_) | PollError::Transport(_) | PollError::Storage(_) => true,
            PollError::Http { .. } => true,
            PollError::Config(_) | PollError::RecoverableState { .. } => false,
        }
    }

    /// True when the remote side rejected the bearer token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, PollError::Http { status: 401, .. })
    }
}

/// Stage of the cycle in which a failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Authenticating,
    Fetching,
    Persisting,
    Committing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Planning => "planning",
            Phase::Authenticating => "authenticating",
            Phase::Fetching => "fetching",
            Phase::Persisting => "persisting",
            Phase::Committing => "committing",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            PollError::from_status(503, "unavailable"),
            PollError::Http { status: 503, .. }
        ));
        assert!(matches!(
            PollError::from_status(429, "slow down"),
            PollError::Http { status: 429, .. }
        ));
        assert!(matches!(
            PollError::from_status(404, "no such report"),
            PollError::Config(_)
        ));
        assert!(matches!(
            PollError::from_status(400, "bad parameter"),
            PollError::Config(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(PollError::from_status(500, "").is_retryable());
        assert!(PollError::from_status(429, "").is_retryable());
        assert!(!PollError::from_status(403, "").is_retryable());
        assert!(PollError::Transport("timeout".into()).is_retryable());
        assert!(PollError::Storage("disk full".into()).is_retryable());
        assert!(!PollError::RecoverableState {
            endpoint_id: "e".into(),
            reason: "bad json".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_unauthorized() {
        assert!(PollError::from_status(401, "expired").is_unauthorized());
        assert!(!PollError::from_status(403, "forbidden").is_unauthorized());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Fetching.to_string(), "fetching");
        assert_eq!(Phase::Committing.to_string(), "committing");
    }
}
