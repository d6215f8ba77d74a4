//! Job lifecycle types.
//!
//! A job is the processing of one file within a task. Its state machine:
//!
//! ```text
//!   create / retry ──→ Pending ──→ Running ──→ Completed
//!                        ▲            │
//!                        │            └──→ Failed(reason)
//!                        └─── retry ◄─────────┘
//! ```
//!
//! **Invariants:**
//! - A job is dispatched to the file processor at most once per attempt.
//! - `result` is only set when status is `Completed`, `error` only when `Failed`.
//! - Only a whole-task retry moves a `Failed` job back to `Pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::result::ProcessOutput;

/// A file submitted as part of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInput {
    /// Original file name, used for the format allow-list check.
    pub file_name: String,
    /// Opaque reference the file processor can resolve (path, blob key, URL).
    pub file_ref: String,
    /// Size in bytes, if known at submission time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl FileInput {
    /// Create a new file input.
    pub fn new(file_name: impl Into<String>, file_ref: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            file_ref: file_ref.into(),
            size_bytes: None,
        }
    }

    /// Set the file size.
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    /// Lower-cased extension of the file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.file_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Status of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the intake queue.
    Pending,
    /// Claimed by a worker slot, processor call in flight.
    Running,
    /// Processor returned a result.
    Completed,
    /// Processor returned an error or timed out.
    Failed,
}

impl JobStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Check if the job still has work outstanding (pending or running).
    pub fn is_outstanding(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One file within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Position within the task's job list.
    pub index: usize,
    /// The file to process.
    pub file: FileInput,
    /// Current status.
    pub status: JobStatus,
    /// Success payload, set once `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessOutput>,
    /// Error description, set once `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time of the latest processor invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    /// Number of times this job has been dispatched.
    #[serde(default)]
    pub attempts: u32,
    /// When the latest attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the latest attempt finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job for `file` at position `index`.
    pub fn new(index: usize, file: FileInput) -> Self {
        Self {
            index,
            file,
            status: JobStatus::Pending,
            result: None,
            error: None,
            processing_time_ms: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn start(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.attempts += 1;
        self.started_at = Some(now);
        self.finished_at = None;
    }

    pub(crate) fn complete(&mut self, output: ProcessOutput, elapsed_ms: u64, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.result = Some(output);
        self.error = None;
        self.processing_time_ms = Some(elapsed_ms);
        self.finished_at = Some(now);
    }

    pub(crate) fn fail(&mut self, error: String, elapsed_ms: u64, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.result = None;
        self.error = Some(error);
        self.processing_time_ms = Some(elapsed_ms);
        self.finished_at = Some(now);
    }

    /// Put the job back in the intake after a failed attempt.
    pub(crate) fn reset(&mut self) {
        self.status = JobStatus::Pending;
        self.result = None;
        self.error = None;
        self.processing_time_ms = None;
        self.started_at = None;
        self.finished_at = None;
    }
}
