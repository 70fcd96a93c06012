//! Per-endpoint polling parameters.

use crate::window::Granularity;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes one data source to poll incrementally.
///
/// # Example
/// ```
/// use gridpoll::{EndpointSpec, Granularity};
///
/// let spec = EndpointSpec::new("rtm_lmp", "np6-788-cd/lmp_node_zone_hub", Granularity::Second)
///     .with_params("SCEDTimestampFrom", "SCEDTimestampTo")
///     .with_lookback_seconds(15 * 60);
/// assert_eq!(spec.bootstrap_lookback().num_minutes(), 15);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Stable identifier; keys the watermark record.
    pub id: String,

    /// API path relative to the client's base URL.
    pub path: String,

    pub granularity: Granularity,

    /// How far back the very first window reaches.
    #[serde(default = "default_lookback_seconds")]
    pub bootstrap_lookback_seconds: u64,

    /// Query parameter receiving the window start.
    pub from_param: String,

    /// Query parameter receiving the window end.
    pub to_param: String,

    /// Fixed parameters sent with every request (e.g. a settlement point).
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,

    /// File name prefix for persisted payloads; defaults to the id.
    #[serde(default)]
    pub output_prefix: Option<String>,
}

fn default_lookback_seconds() -> u64 {
    15 * 60
}

impl EndpointSpec {
    pub fn new(id: impl Into<String>, path: impl Into<String>, granularity: Granularity) -> Self {
        let (from_param, to_param) = match granularity {
            Granularity::Day => ("deliveryDateFrom", "deliveryDateTo"),
            Granularity::Second => ("SCEDTimestampFrom", "SCEDTimestampTo"),
        };
        Self {
            id: id.into(),
            path: path.into(),
            granularity,
            bootstrap_lookback_seconds: default_lookback_seconds(),
            from_param: from_param.to_string(),
            to_param: to_param.to_string(),
            extra_params: BTreeMap::new(),
            output_prefix: None,
        }
    }

    pub fn with_params(mut self, from_param: &str, to_param: &str) -> Self {
        self.from_param = from_param.to_string();
        self.to_param = to_param.to_string();
        self
    }

    pub fn with_lookback_seconds(mut self, seconds: u64) -> Self {
        self.bootstrap_lookback_seconds = seconds;
        self
    }

    pub fn with_extra_param(mut self, key: &str, value: &str) -> Self {
        self.extra_params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn bootstrap_lookback(&self) -> Duration {
        let seconds = i64::try_from(self.bootstrap_lookback_seconds)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        Duration::seconds(seconds)
    }

    pub fn output_prefix(&self) -> &str {
        self.output_prefix.as_deref().unwrap_or(&self.id)
    }
}
