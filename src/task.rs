//! Task lifecycle types.
//!
//! A task is one batch submission. Its state machine:
//!
//! ```text
//!   create() ──→ Pending ──→ Processing ──→ Completed
//!                  │  ▲          │
//!                  │  │          ├──→ Failed
//!                  │  │          │
//!                  │  │          └──→ Partial
//!                  │  └── retry() ◄── Failed | Partial
//!                  └──→ Cancelled
//! ```
//!
//! **Invariants:**
//! - The job list is fixed at creation; its length never changes.
//! - `Completed` iff every job completed, `Failed` iff every job failed,
//!   `Partial` iff the jobs are a terminal mix of both.
//! - `Completed` and `Cancelled` are permanent.
//! - A task enters `Processing` the moment its first job leaves `Pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{FileInput, Job, JobStatus};

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random task id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created or re-queued, no job claimed yet.
    Pending,
    /// At least one job has left `Pending`, some work outstanding.
    Processing,
    /// Every job completed.
    Completed,
    /// Every job failed.
    Failed,
    /// Terminal mix of completed and failed jobs.
    Partial,
    /// Cancelled before any job started.
    Cancelled,
}

impl TaskStatus {
    /// Check if no work is outstanding.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Partial | TaskStatus::Cancelled
        )
    }

    /// Check if a whole-task retry is allowed from this status.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Partial)
    }

    /// Check if the state machine allows moving from `self` to `next`.
    ///
    /// `Processing → Cancelled` is listed for cooperative abort of in-flight
    /// jobs; no queue operation performs it yet.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (*self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Partial)
                | (Processing, Cancelled)
                | (Failed, Pending)
                | (Partial, Pending)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Partial => "partial",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "partial" => Ok(TaskStatus::Partial),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Processing options snapshot, passed through to the file processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Language to translate or generate into.
    pub target_language: String,
    /// Source language, when known. The processor detects it otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    /// Output document format (e.g. `docx`, `pdf`, `md`).
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Keep the original text alongside the translation.
    #[serde(default)]
    pub include_original: bool,
    /// Also produce the secondary artifact (e.g. a generated summary sheet).
    #[serde(default)]
    pub generate_secondary: bool,
    /// Processor-specific extras.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

fn default_output_format() -> String {
    "docx".to_string()
}

impl TaskOptions {
    /// Options targeting `target_language` with default output settings.
    pub fn new(target_language: impl Into<String>) -> Self {
        Self {
            target_language: target_language.into(),
            source_language: None,
            output_format: default_output_format(),
            include_original: false,
            generate_secondary: false,
            extra: serde_json::Value::Null,
        }
    }

    /// Set the source language.
    pub fn with_source_language(mut self, lang: impl Into<String>) -> Self {
        self.source_language = Some(lang.into());
        self
    }

    /// Set the output format.
    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = format.into();
        self
    }

    /// Keep the original text in the output.
    pub fn with_original(mut self, include: bool) -> Self {
        self.include_original = include;
        self
    }

    /// Request the secondary artifact.
    pub fn with_secondary(mut self, generate: bool) -> Self {
        self.generate_secondary = generate;
        self
    }
}

/// One batch submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Immutable identifier.
    pub id: TaskId,
    /// Current status.
    pub status: TaskStatus,
    /// Options snapshot.
    pub options: TaskOptions,
    /// One job per input file, in submission order.
    pub jobs: Vec<Job>,
    /// Number of whole-task retries performed.
    pub retry_count: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// When the current run claimed its first job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the current run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// `completed_at - started_at`, once both exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

impl Task {
    /// Create a pending task with one pending job per file.
    pub fn new(files: Vec<FileInput>, options: TaskOptions) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            status: TaskStatus::Pending,
            options,
            jobs: files
                .into_iter()
                .enumerate()
                .map(|(index, file)| Job::new(index, file))
                .collect(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            processing_time_ms: None,
        }
    }

    /// Number of jobs in a given status.
    pub fn count_jobs(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Check if any job has left `Pending` in the current run.
    pub fn has_started_jobs(&self) -> bool {
        self.jobs.iter().any(|j| j.status != JobStatus::Pending)
    }

    /// Status implied by the job list.
    ///
    /// Returns `None` while every job is still `Pending`, leaving the task in
    /// whatever pre-dispatch status it has.
    pub fn derive_status(&self) -> Option<TaskStatus> {
        if self.jobs.iter().all(|j| j.status == JobStatus::Pending) {
            return None;
        }
        if self.jobs.iter().any(|j| j.status.is_outstanding()) {
            return Some(TaskStatus::Processing);
        }
        let completed = self.count_jobs(JobStatus::Completed);
        Some(if completed == self.jobs.len() {
            TaskStatus::Completed
        } else if completed == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Partial
        })
    }

    /// Stamp the end of a run.
    pub(crate) fn finish(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
        self.processing_time_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with(statuses: &[JobStatus]) -> Task {
        let files = (0..statuses.len())
            .map(|i| FileInput::new(format!("f{i}.txt"), format!("ref{i}")))
            .collect();
        let mut task = Task::new(files, TaskOptions::new("en"));
        for (job, status) in task.jobs.iter_mut().zip(statuses) {
            job.status = *status;
        }
        task
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Partial.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Failed.is_retryable());
        assert!(!TaskStatus::Completed.is_retryable());
    }

    #[test]
    fn test_transition_table() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Partial.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_derive_status() {
        use JobStatus::*;
        assert_eq!(task_with(&[Pending, Pending]).derive_status(), None);
        assert_eq!(
            task_with(&[Running, Pending]).derive_status(),
            Some(TaskStatus::Processing)
        );
        assert_eq!(
            task_with(&[Completed, Pending]).derive_status(),
            Some(TaskStatus::Processing)
        );
        assert_eq!(
            task_with(&[Completed, Completed]).derive_status(),
            Some(TaskStatus::Completed)
        );
        assert_eq!(
            task_with(&[Failed, Failed]).derive_status(),
            Some(TaskStatus::Failed)
        );
        assert_eq!(
            task_with(&[Completed, Failed, Completed]).derive_status(),
            Some(TaskStatus::Partial)
        );
    }

    #[test]
    fn test_task_id_roundtrip_display() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_task_status_parse() {
        assert_eq!("Partial".parse::<TaskStatus>(), Ok(TaskStatus::Partial));
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_options_defaults_from_json() {
        let opts: TaskOptions = serde_json::from_str(r#"{"target_language":"ja"}"#).unwrap();
        assert_eq!(opts.output_format, "docx");
        assert!(!opts.include_original);
        assert!(opts.extra.is_null());
    }
}
