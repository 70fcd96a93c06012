//! Watermark records stored as one JSON file per endpoint.

use super::{Watermark, WatermarkStore};
use crate::atomic::write_atomic;
use crate::clock::Timestamp;
use crate::error::PollError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Filesystem-backed [`WatermarkStore`].
///
/// Records live at `{directory}/{endpoint_key}.json`, where the key is the
/// endpoint id with every character outside `[A-Za-z0-9_-]` replaced by `_`.
pub struct FileWatermarkStore {
    directory: PathBuf,
}

impl FileWatermarkStore {
    /// Opens (and creates if missing) the state directory.
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self, PollError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| {
            PollError::Storage(format!(
                "failed to create state directory {}: {}",
                directory.display(),
                e
            ))
        })?;
        Ok(Self { directory })
    }

    /// Path of the record for `endpoint_id`.
    pub fn path_for(&self, endpoint_id: &str) -> PathBuf {
        self.directory
            .join(format!("{}.json", endpoint_key(endpoint_id)))
    }
}

/// File-name-safe form of an endpoint id.
pub fn endpoint_key(endpoint_id: &str) -> String {
    endpoint_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl WatermarkStore for FileWatermarkStore {
    fn load(&self, endpoint_id: &str) -> Result<Option<Watermark>, PollError> {
        let path = self.path_for(endpoint_id);
        let unreadable = |reason: String| PollError::RecoverableState {
            endpoint_id: endpoint_id.to_string(),
            reason,
        };

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(endpoint = %endpoint_id, path = %path.display(), "No watermark record");
                return Ok(None);
            }
            Err(e) => return Err(unreadable(format!("read {}: {}", path.display(), e))),
        };

        let mut watermark: Watermark = serde_json::from_str(&contents)
            .map_err(|e| unreadable(format!("parse {}: {}", path.display(), e)))?;

        if watermark.endpoint_id.is_empty() {
            warn!(
                endpoint = %endpoint_id,
                path = %path.display(),
                "Watermark record has no endpoint id, adopting it"
            );
            watermark.endpoint_id = endpoint_id.to_string();
        } else if watermark.endpoint_id != endpoint_id {
            return Err(unreadable(format!(
                "record at {} belongs to endpoint '{}'",
                path.display(),
                watermark.endpoint_id
            )));
        }

        Ok(Some(watermark))
    }

    fn commit(
        &self,
        endpoint_id: &str,
        to: Timestamp,
        record_count: u64,
        poll_time: Timestamp,
    ) -> Result<Watermark, PollError> {
        let watermark = Watermark {
            last_to: to,
            last_poll_time: poll_time,
            last_record_count: record_count,
            endpoint_id: endpoint_id.to_string(),
        };

        let json = serde_json::to_string_pretty(&watermark)
            .map_err(|e| PollError::Storage(format!("serialize watermark: {}", e)))?;

        let path = self.path_for(endpoint_id);
        write_atomic(&path, json.as_bytes()).map_err(|e| {
            PollError::Storage(format!("write watermark {}: {}", path.display(), e))
        })?;

        debug!(
            endpoint = %endpoint_id,
            last_to = %watermark.last_to,
            records = record_count,
            "Watermark committed"
        );
        Ok(watermark)
    }

    fn reset(&self, endpoint_id: &str) -> Result<bool, PollError> {
        let path = self.path_for(endpoint_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(endpoint = %endpoint_id, path = %path.display(), "Watermark reset");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PollError::Storage(format!(
                "delete watermark {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
