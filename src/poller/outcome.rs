use crate::error::{Phase, PollError};
use crate::window::TimeWindow;

/// How a cycle ended.
#[derive(Debug)]
pub enum PollResult {
    /// Payload persisted and watermark advanced.
    Success,
    /// Planned window was empty; nothing was called or written.
    NoOp,
    /// Cycle aborted in `phase`.
    Failure { phase: Phase, error: PollError },
}

/// Report of one `run_once` call.
#[derive(Debug)]
pub struct PollOutcome {
    pub endpoint_id: String,
    /// `None` only when planning failed before a window existed.
    pub window: Option<TimeWindow>,
    /// Records persisted this cycle (also set when only the commit failed).
    pub record_count: u64,
    pub result: PollResult,
}

impl PollOutcome {
    pub(crate) fn success(endpoint_id: String, window: TimeWindow, record_count: u64) -> Self {
        Self {
            endpoint_id,
            window: Some(window),
            record_count,
            result: PollResult::Success,
        }
    }

    pub(crate) fn noop(endpoint_id: String, window: TimeWindow) -> Self {
        Self {
            endpoint_id,
            window: Some(window),
            record_count: 0,
            result: PollResult::NoOp,
        }
    }

    pub(crate) fn failed(
        endpoint_id: String,
        window: Option<TimeWindow>,
        phase: Phase,
        error: PollError,
    ) -> Self {
        Self {
            endpoint_id,
            window,
            record_count: 0,
            result: PollResult::Failure { phase, error },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, PollResult::Success)
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.result, PollResult::NoOp)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.result, PollResult::Failure { .. })
    }

    /// The failure, if the cycle aborted.
    pub fn error(&self) -> Option<(Phase, &PollError)> {
        match &self.result {
            PollResult::Failure { phase, error } => Some((*phase, error)),
            _ => None,
        }
    }
}
