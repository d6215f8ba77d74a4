//! Queue error types.
//!
//! Errors are categorized by who sees them:
//!
//! | Category | Variants | Surfaced |
//! |----------|----------|----------|
//! | **Structural** | `InvalidInput`, `NotFound`, `InvalidState`, `RetryLimitExceeded` | Returned to the caller of the mutating operation |
//! | **Job-level** | `Processing`, `Timeout` | Recorded on the failed job, never returned from `create_task` |
//! | **Infrastructure** | `Store`, `Export`, `ShuttingDown` | Returned to the caller |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum QueueError {
    // ── Structural errors (caller-facing) ────────────────────────────
    /// Bad submission: empty or oversized file set, unsupported format.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown task id.
    #[error("Task not found: {0}")]
    NotFound(String),

    /// Operation is not legal for the task's current status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The task has already been retried `max_retries` times.
    #[error("Retry limit exceeded for task {task_id} ({max_retries} retries)")]
    RetryLimitExceeded {
        /// Task that was asked to retry.
        task_id: String,
        /// Configured cap.
        max_retries: u32,
    },

    // ── Job-level errors (recorded on the job) ───────────────────────
    /// The file processor reported a failure.
    #[error("Processing failed: {0}")]
    Processing(String),

    /// The file processor did not finish before the job deadline.
    #[error("Processing timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    // ── Infrastructure errors ────────────────────────────────────────
    /// The task record store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Rendering an export failed.
    #[error("Export error: {0}")]
    Export(String),

    /// The queue is shutting down and no longer accepts work.
    #[error("Queue is shutting down")]
    ShuttingDown,
}

impl QueueError {
    /// Returns `true` for errors that describe an illegal request rather than a
    /// failure while doing work.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::NotFound(_)
                | Self::InvalidState(_)
                | Self::RetryLimitExceeded { .. }
        )
    }

    /// Returns `true` for errors that belong on a job record.
    pub fn is_job_level(&self) -> bool {
        matches!(self, Self::Processing(_) | Self::Timeout(_))
    }

    /// Returns `true` if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Export(err.to_string())
    }
}

impl From<csv::Error> for QueueError {
    fn from(err: csv::Error) -> Self {
        Self::Export(err.to_string())
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert!(QueueError::InvalidInput("empty".into()).is_structural());
        assert!(QueueError::NotFound("t-1".into()).is_structural());
        assert!(
            QueueError::RetryLimitExceeded {
                task_id: "t-1".into(),
                max_retries: 3
            }
            .is_structural()
        );
        assert!(!QueueError::Processing("boom".into()).is_structural());

        assert!(QueueError::Timeout(Duration::from_secs(1)).is_job_level());
        assert!(QueueError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(!QueueError::ShuttingDown.is_job_level());
    }

    #[test]
    fn test_error_display() {
        let err = QueueError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Processing timed out after 1500ms");

        let err = QueueError::RetryLimitExceeded {
            task_id: "abc".into(),
            max_retries: 3,
        };
        assert_eq!(err.to_string(), "Retry limit exceeded for task abc (3 retries)");
    }
}
