//! Window planning and the granularity-aware timestamp codec.
//!
//! All endpoints share this one codec: a data source only declares its
//! [`Granularity`], and the textual form of every timestamp it sends or
//! stores follows from that.

use crate::clock::Timestamp;
use crate::watermark::Watermark;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[cfg(test)]
mod tests;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Precision unit of a data source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Second,
}

impl Granularity {
    /// Smallest step between two distinct timestamps at this precision.
    pub fn one_unit(self) -> Duration {
        match self {
            Granularity::Day => Duration::days(1),
            Granularity::Second => Duration::seconds(1),
        }
    }

    /// Drops everything finer than this precision.
    pub fn truncate(self, ts: Timestamp) -> Timestamp {
        match self {
            Granularity::Day => ts.date().and_time(NaiveTime::MIN),
            Granularity::Second => ts.with_nanosecond(0).unwrap_or(ts),
        }
    }

    /// Wire form: `YYYY-MM-DD` for days, `YYYY-MM-DDTHH:MM:SS` for seconds.
    pub fn format(self, ts: Timestamp) -> String {
        match self {
            Granularity::Day => ts.format(DATE_FORMAT).to_string(),
            Granularity::Second => ts.format(DATE_TIME_FORMAT).to_string(),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Day => f.write_str("day"),
            Granularity::Second => f.write_str("second"),
        }
    }
}

/// Lenient ISO-8601 parser for persisted and configured timestamps.
///
/// Accepts `YYYY-MM-DD` (midnight), `YYYY-MM-DDTHH:MM:SS` and the same with
/// fractional seconds or a space separator.
pub fn parse_timestamp(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        DATE_TIME_FORMAT,
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Half-open interval `[from, to)` bounding one fetch.
///
/// `from >= to` is a NO_OP: nothing new can exist yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: Timestamp,
    pub to: Timestamp,
    pub granularity: Granularity,
}

impl TimeWindow {
    pub fn is_noop(&self) -> bool {
        self.from >= self.to
    }

    /// Length of the window; zero for a NO_OP window.
    pub fn duration(&self) -> Duration {
        if self.is_noop() {
            Duration::zero()
        } else {
            self.to - self.from
        }
    }

    pub fn from_formatted(&self) -> String {
        self.granularity.format(self.from)
    }

    pub fn to_formatted(&self) -> String {
        self.granularity.format(self.to)
    }

    /// Encodes the window into the endpoint's query parameters.
    pub fn to_params(&self, from_param: &str, to_param: &str) -> HashMap<String, String> {
        let mut params = HashMap::new();
        params.insert(from_param.to_string(), self.from_formatted());
        params.insert(to_param.to_string(), self.to_formatted());
        params
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from_formatted(), self.to_formatted())
    }
}

/// Computes the next window to request.
///
/// # Rules
/// - First run: `[truncate(now - lookback), truncate(now))`
/// - Later runs: `[last_to + one_unit, truncate(now))`
///
/// Arithmetic overflow yields a NO_OP window anchored at `truncate(now)`.
pub fn plan(
    last: Option<&Watermark>,
    now: Timestamp,
    bootstrap_lookback: Duration,
    granularity: Granularity,
) -> TimeWindow {
    let to = granularity.truncate(now);

    let from = match last {
        None => now
            .checked_sub_signed(bootstrap_lookback)
            .map(|start| granularity.truncate(start)),
        Some(watermark) => granularity
            .truncate(watermark.last_to)
            .checked_add_signed(granularity.one_unit()),
    };

    TimeWindow {
        from: from.unwrap_or(to),
        to,
        granularity,
    }
}
