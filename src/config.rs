//! Queue configuration.
//!
//! Every knob the queue uses is injected here at construction; nothing reads
//! globals. Durations are (de)serialized as milliseconds so a config file reads
//! `"job_timeout_ms": 300000`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};

/// Document formats accepted by default.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "txt", "md", "rtf", "odt", "html", "htm", "xls", "xlsx", "ppt", "pptx",
];

/// Configuration for a [`BatchQueue`](crate::BatchQueue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of concurrent worker slots.
    pub worker_count: usize,
    /// Maximum number of files in one task.
    pub max_files_per_task: usize,
    /// Maximum whole-task retries.
    pub max_retries: u32,
    /// Per-job processor deadline.
    #[serde(rename = "job_timeout_ms", with = "duration_ms")]
    pub job_timeout: Duration,
    /// Accepted file extensions, lower-case, without the dot.
    pub allowed_extensions: Vec<String>,
    /// Reject files whose known size exceeds this many bytes.
    pub max_file_size_bytes: Option<u64>,
    /// Capacity of the task event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_files_per_task: 50,
            max_retries: 3,
            job_timeout: Duration::from_secs(300),
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            max_file_size_bytes: None,
            event_capacity: 256,
        }
    }
}

impl QueueConfig {
    /// Create default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON config document. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> QueueResult<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| QueueError::InvalidInput(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// With worker slot count.
    #[must_use]
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// With maximum files per task.
    #[must_use]
    pub fn with_max_files(mut self, max: usize) -> Self {
        self.max_files_per_task = max;
        self
    }

    /// With maximum retries.
    #[must_use]
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// With per-job timeout.
    #[must_use]
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// With the accepted extension list.
    #[must_use]
    pub fn with_allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = exts
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// With a per-file size cap.
    #[must_use]
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = Some(bytes);
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> QueueResult<()> {
        if self.worker_count == 0 {
            return Err(QueueError::InvalidInput("worker_count must be at least 1".into()));
        }
        if self.max_files_per_task == 0 {
            return Err(QueueError::InvalidInput(
                "max_files_per_task must be at least 1".into(),
            ));
        }
        if self.job_timeout.is_zero() {
            return Err(QueueError::InvalidInput("job_timeout must be non-zero".into()));
        }
        if self.allowed_extensions.is_empty() {
            return Err(QueueError::InvalidInput(
                "allowed_extensions must not be empty".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::InvalidInput("event_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Check if `ext` (lower-case, no dot) is on the allow-list.
    pub fn is_allowed_extension(&self, ext: &str) -> bool {
        self.allowed_extensions.iter().any(|a| a == ext)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_files_per_task, 50);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert!(config.is_allowed_extension("docx"));
        assert!(!config.is_allowed_extension("exe"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            QueueConfig::from_json_str(r#"{"worker_count": 8, "job_timeout_ms": 1500}"#).unwrap();
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.job_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_files_per_task, 50);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let err = QueueConfig::new().with_workers(0).validate().unwrap_err();
        assert!(matches!(err, QueueError::InvalidInput(_)));

        let err = QueueConfig::from_json_str(r#"{"job_timeout_ms": 0}"#).unwrap_err();
        assert!(err.to_string().contains("job_timeout"));
    }

    #[test]
    fn test_extension_normalization() {
        let config = QueueConfig::new().with_allowed_extensions([".PDF", "Txt"]);
        assert_eq!(config.allowed_extensions, vec!["pdf", "txt"]);
    }

    #[test]
    fn test_serialize_roundtrip_keeps_millis() {
        let config = QueueConfig::new().with_job_timeout(Duration::from_millis(250));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["job_timeout_ms"], 250);
    }
}
