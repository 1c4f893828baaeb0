//! Upload tuning knobs.

use std::time::Duration;

use chunkup_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FILE_SIZE, UploadLimits};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Client-side upload configuration.
///
/// Every field has a default, so a partial TOML table is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Chunk size requested from the server, in bytes.
    pub chunk_size: u64,
    /// Largest file the client will try to upload, in bytes.
    pub max_file_size: u64,
    /// Allow-list of extensions or MIME types; empty accepts everything.
    pub accepted_file_types: Vec<String>,
    /// Attempts per chunk, including the first.
    pub max_retries: u32,
    /// Linear backoff unit, in milliseconds.
    pub retry_delay_ms: u64,
    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            accepted_file_types: Vec::new(),
            max_retries: policy.max_retries,
            retry_delay_ms: policy.base_delay.as_millis() as u64,
            request_timeout_secs: policy.request_timeout.as_secs(),
        }
    }
}

impl UploadConfig {
    pub fn limits(&self) -> UploadLimits {
        UploadLimits {
            max_file_size: self.max_file_size,
            accepted_file_types: self.accepted_file_types.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_delay_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_retry_policy() {
        let config = UploadConfig::default();
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.max_file_size, 100 * 1024 * 1024);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(config.limits().accepted_file_types.is_empty());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: UploadConfig =
            serde_json::from_str(r#"{"chunk_size": 4096, "accepted_file_types": [".pdf"]}"#)
                .unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.limits().accepted_file_types, vec![".pdf".to_string()]);
    }

    #[test]
    fn zero_retries_still_sends_once() {
        let config = UploadConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(config.retry_policy().max_retries, 1);
    }
}
