//! Writes fetched payloads as JSON files.
//!
//! Layout, organized by the window end:
//!
//! ```text
//! {output_dir}/{endpoint}/2025-01-27/10/rtm_lmp_20250127_094500_to_20250127_100000.json   (second)
//! {output_dir}/{endpoint}/2025-01-27/dam_spp_20250126_000000_to_20250127_000000.json      (day)
//! ```

use async_trait::async_trait;
use gridpoll::atomic::write_atomic;
use gridpoll::watermark::endpoint_key;
use gridpoll::{Granularity, LocationHint, PollError, ResultSink};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct JsonFileSink {
    output_dir: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Target file for a window.
    pub fn path_for(&self, hint: &LocationHint) -> PathBuf {
        let window = &hint.window;
        let mut dir = self
            .output_dir
            .join(endpoint_key(&hint.endpoint_id))
            .join(window.to.format("%Y-%m-%d").to_string());
        if window.granularity == Granularity::Second {
            dir = dir.join(window.to.format("%H").to_string());
        }
        dir.join(format!(
            "{}_{}_to_{}.json",
            hint.prefix,
            window.from.format("%Y%m%d_%H%M%S"),
            window.to.format("%Y%m%d_%H%M%S")
        ))
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn persist(&self, payload: &Value, hint: &LocationHint) -> Result<u64, PollError> {
        let path = self.path_for(hint);
        let bytes = serde_json::to_vec_pretty(payload)
            .map_err(|e| PollError::Storage(format!("failed to encode payload: {}", e)))?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|e| PollError::Storage(format!("payload write task failed: {}", e)))?
            .map_err(|e| {
                PollError::Storage(format!("failed to write {}: {}", path.display(), e))
            })?;

        let records = count_records(payload);
        info!(
            endpoint = %hint.endpoint_id,
            path = %path.display(),
            records = records,
            "Payload saved"
        );
        Ok(records)
    }
}

/// Number of records in a report payload.
///
/// Tries `data`, then `_meta.totalRecords`, then `report.data`; anything else
/// counts as zero.
pub fn count_records(payload: &Value) -> u64 {
    if let Some(data) = payload.get("data").and_then(Value::as_array) {
        return data.len() as u64;
    }
    if let Some(total) = payload
        .get("_meta")
        .and_then(|m| m.get("totalRecords"))
        .and_then(Value::as_u64)
    {
        return total;
    }
    payload
        .get("report")
        .and_then(|r| r.get("data"))
        .and_then(Value::as_array)
        .map(|d| d.len() as u64)
        .unwrap_or(0)
}
