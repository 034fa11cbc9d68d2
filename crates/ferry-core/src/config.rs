//! Queue configuration.
//!
//! Values come from a JSON file (camelCase keys); anything missing falls back
//! to `QueueConfig::default()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    /// Directory holding the snapshot file.
    pub store_dir: PathBuf,
    pub snapshot_file: String,

    /// Backoff base: the n-th failure waits `base * 2^(n-1)`.
    pub base_retry_delay_ms: u64,
    /// Failures before an item becomes permanently failed.
    pub max_retries: u32,
    /// Sent items older than this are purged by cleanup.
    pub retention_days: u32,

    pub flush_interval_ms: u64,
    pub cleanup_interval_ms: u64,

    pub inter_item_delay_ms: u64,
    pub idle_poll_interval_ms: u64,
    pub unconfigured_poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,

    pub log_level: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("queue"),
            snapshot_file: "queue.json".to_string(),
            base_retry_delay_ms: 5_000,
            max_retries: 3,
            retention_days: 7,
            flush_interval_ms: 2_000,
            cleanup_interval_ms: 60 * 60 * 1_000,
            inter_item_delay_ms: 250,
            idle_poll_interval_ms: 1_000,
            unconfigured_poll_interval_ms: 30_000,
            shutdown_grace_ms: 10_000,
            log_level: "info".to_string(),
        }
    }
}

impl QueueConfig {
    /// Read and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: QueueConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("maxRetries must be at least 1".into()));
        }
        if self.snapshot_file.trim().is_empty() {
            return Err(ConfigError::Invalid("snapshotFile must not be empty".into()));
        }
        let intervals = [
            ("flushIntervalMs", self.flush_interval_ms),
            ("cleanupIntervalMs", self.cleanup_interval_ms),
            ("idlePollIntervalMs", self.idle_poll_interval_ms),
            ("unconfiguredPollIntervalMs", self.unconfigured_poll_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
        }
        Ok(())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.store_dir.join(&self.snapshot_file)
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn unconfigured_poll_interval(&self) -> Duration {
        Duration::from_millis(self.unconfigured_poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = QueueConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_retry_delay(), Duration::from_secs(5));
        assert_eq!(config.snapshot_path(), PathBuf::from("queue").join("queue.json"));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{ "maxRetries": 5, "storeDir": "/var/lib/ferry" }}"#).unwrap();

        let config = QueueConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.store_dir, PathBuf::from("/var/lib/ferry"));
        assert_eq!(config.retention_days, 7);
    }

    #[test]
    fn unreadable_file_is_reported_with_path() {
        let err = QueueConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = QueueConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[rstest]
    #[case::no_retries(QueueConfig { max_retries: 0, ..QueueConfig::default() })]
    #[case::no_flush(QueueConfig { flush_interval_ms: 0, ..QueueConfig::default() })]
    #[case::no_idle_poll(QueueConfig { idle_poll_interval_ms: 0, ..QueueConfig::default() })]
    #[case::empty_snapshot_name(QueueConfig { snapshot_file: " ".into(), ..QueueConfig::default() })]
    fn invalid_values_are_rejected(#[case] config: QueueConfig) {
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
