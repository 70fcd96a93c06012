//! Durable polling progress.
//!
//! A [`Watermark`] is the exclusive upper bound of what has already been
//! retrieved for one endpoint. It is only ever written after the payload for
//! the window it covers has been persisted, and it is never rolled back
//! automatically.
//!
//! # Record layout
//!
//! ```json
//! {
//!   "last_to": "2025-01-27T10:00:00",
//!   "last_poll_time": "2025-01-27T10:00:02",
//!   "last_record_count": 4210,
//!   "endpoint_id": "rtm_lmp"
//! }
//! ```
//!
//! Missing and corrupt records are never conflated: `load` returns
//! `Ok(None)` only when no record exists, and a record that cannot be read
//! is a [`PollError::RecoverableState`] that stays put until someone calls
//! `reset`.

use crate::clock::Timestamp;
use crate::error::PollError;
use serde::{Deserialize, Serialize};

mod file;

pub use file::{endpoint_key, FileWatermarkStore};

/// Persisted progress for one endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Upper bound of the last committed window.
    #[serde(with = "iso_timestamp", alias = "last_timestamp")]
    pub last_to: Timestamp,

    /// When the committing cycle ran.
    #[serde(with = "iso_timestamp")]
    pub last_poll_time: Timestamp,

    /// Records persisted by the committing cycle.
    #[serde(default, alias = "last_records_retrieved")]
    pub last_record_count: u64,

    /// Owner of the record; empty for records written by older tooling.
    #[serde(default)]
    pub endpoint_id: String,
}

/// Durable, atomic storage of polling progress per endpoint.
///
/// Methods are synchronous on purpose: a commit has no await point, so
/// cancelling a poll cycle can never interrupt it half-way.
pub trait WatermarkStore: Send + Sync {
    /// Returns the persisted watermark, `None` if the endpoint never committed.
    ///
    /// # Errors
    /// * `PollError::RecoverableState` - a record exists but is unreadable
    fn load(&self, endpoint_id: &str) -> Result<Option<Watermark>, PollError>;

    /// Atomically replaces the endpoint's record.
    ///
    /// # Errors
    /// * `PollError::Storage` - the previous record is still in place
    fn commit(
        &self,
        endpoint_id: &str,
        to: Timestamp,
        record_count: u64,
        poll_time: Timestamp,
    ) -> Result<Watermark, PollError>;

    /// Deletes the endpoint's record; returns whether one existed.
    fn reset(&self, endpoint_id: &str) -> Result<bool, PollError>;
}

/// Serde adapter writing `YYYY-MM-DDTHH:MM:SS` and reading any form
/// accepted by [`crate::window::parse_timestamp`].
pub(crate) mod iso_timestamp {
    use crate::clock::Timestamp;
    use crate::window::parse_timestamp;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format("%Y-%m-%dT%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }
}
