//! Task queue manager.
//!
//! The manager is the only component that mutates task records. Every mutating
//! operation runs as one read-modify-write under a mutex scoped to the task id,
//! so operations on different tasks never contend:
//!
//! | Operation | Legal from | Result |
//! |-----------|-----------|--------|
//! | `create_task` | — | `Pending`, tickets pushed |
//! | `claim_job` | job `Pending`, task not cancelled | job `Running`, task `Processing` |
//! | `record_job_outcome` | job `Running` | job terminal, task re-derived |
//! | `cancel_task` | task `Pending`, no job started | `Cancelled`, tickets purged |
//! | `retry_task` | task `Failed`/`Partial`, retries left | `Pending`, failed jobs re-pushed |
//! | `delete_task` | task terminal | record removed |
//!
//! Events and intake pushes happen after the record is stored and before the
//! task lock is released.
//!
//! Writes to the store additionally hold a shared commit epoch. Snapshots take
//! the epoch exclusively, so a snapshot observes the store between two commits
//! and never mixes records from before and after a worker's outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::event::{EventBus, TaskEvent};
use crate::job::{FileInput, Job, JobStatus};
use crate::result::ProcessOutput;
use crate::scheduler::{JobIntake, JobTicket};
use crate::store::TaskRecordStore;
use crate::task::{Task, TaskId, TaskOptions, TaskStatus};

/// Default page size for [`TaskQuery`].
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Largest page [`TaskQuery`] will return.
pub const MAX_PAGE_LIMIT: usize = 100;

/// How a dispatched job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The processor returned a result.
    Completed {
        /// Success payload.
        output: ProcessOutput,
        /// Wall time of the invocation.
        processing_time_ms: u64,
    },
    /// The processor failed or timed out.
    Failed {
        /// `Processing` or `Timeout`.
        error: QueueError,
        /// Wall time of the invocation.
        processing_time_ms: u64,
    },
}

/// What a worker slot needs to run a claimed job.
#[derive(Debug, Clone)]
pub struct JobClaim {
    /// File to process.
    pub file: FileInput,
    /// Options snapshot of the parent task.
    pub options: TaskOptions,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

/// Filter and pagination for [`TaskQueueManager::list_tasks`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQuery {
    /// Only tasks in this status.
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Number of matching tasks to skip.
    #[serde(default)]
    pub offset: usize,
    /// Page size, defaults to [`DEFAULT_PAGE_LIMIT`], capped at [`MAX_PAGE_LIMIT`].
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TaskQuery {
    /// All tasks, first page.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the offset and page size.
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Number of items matching the filter across all pages.
    pub total: usize,
    /// Offset this page starts at.
    pub offset: usize,
    /// Page size used.
    pub limit: usize,
}

impl<T> Page<T> {
    /// Check if more items follow this page.
    pub fn has_more(&self) -> bool {
        self.offset + self.items.len() < self.total
    }
}

/// Sole owner of task and job state transitions.
pub struct TaskQueueManager {
    store: Arc<dyn TaskRecordStore>,
    intake: Arc<JobIntake>,
    locks: DashMap<TaskId, Arc<Mutex<()>>>,
    commits: RwLock<()>,
    events: EventBus,
    config: QueueConfig,
}

impl std::fmt::Debug for TaskQueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueueManager")
            .field("queued_tickets", &self.intake.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskQueueManager {
    /// Create a manager over `store`, pushing work onto `intake`.
    pub fn new(store: Arc<dyn TaskRecordStore>, intake: Arc<JobIntake>, config: QueueConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            store,
            intake,
            locks: DashMap::new(),
            commits: RwLock::new(()),
            events,
            config,
        }
    }

    /// The intake this manager feeds.
    pub fn intake(&self) -> &Arc<JobIntake> {
        &self.intake
    }

    /// The configuration in effect.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Subscribe to committed state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn lock_for(&self, id: &TaskId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(*id).or_default().value())
    }

    fn commit(&self, task: Task) -> QueueResult<()> {
        let _epoch = self.commits.read();
        self.store.put(task)
    }

    fn load(&self, id: &TaskId) -> QueueResult<Task> {
        match self.store.get(id)? {
            Some(task) => Ok(task),
            None => {
                // Unknown ids must not accumulate lock entries.
                self.locks.remove(id);
                Err(QueueError::NotFound(id.to_string()))
            }
        }
    }

    // =======================================================================
    // Caller-facing
    // =======================================================================

    /// Validate a submission without creating anything.
    pub fn validate_files(&self, files: &[FileInput]) -> QueueResult<()> {
        if files.is_empty() {
            return Err(QueueError::InvalidInput("no files submitted".into()));
        }
        if files.len() > self.config.max_files_per_task {
            return Err(QueueError::InvalidInput(format!(
                "{} files submitted, at most {} allowed per task",
                files.len(),
                self.config.max_files_per_task
            )));
        }
        for (i, file) in files.iter().enumerate() {
            if file.file_name.trim().is_empty() {
                return Err(QueueError::InvalidInput(format!("file {i} has an empty name")));
            }
            match file.extension() {
                Some(ext) if self.config.is_allowed_extension(&ext) => {}
                _ => {
                    return Err(QueueError::InvalidInput(format!(
                        "unsupported file format: {}",
                        file.file_name
                    )));
                }
            }
            if let (Some(max), Some(size)) = (self.config.max_file_size_bytes, file.size_bytes) {
                if size > max {
                    return Err(QueueError::InvalidInput(format!(
                        "{} is {size} bytes, limit is {max}",
                        file.file_name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Create a task from a batch of files and queue every job.
    ///
    /// Nothing is stored when validation fails.
    pub fn create_task(&self, files: Vec<FileInput>, options: TaskOptions) -> QueueResult<TaskId> {
        self.validate_files(&files)?;

        let task = Task::new(files, options);
        let id = task.id;
        let tickets: Vec<JobTicket> = (0..task.jobs.len())
            .map(|job_index| JobTicket { task_id: id, job_index })
            .collect();

        let lock = self.lock_for(&id);
        let _guard = lock.lock();
        self.commit(task)?;
        let queued = self.intake.push_batch(tickets);
        self.events
            .publish_all(vec![TaskEvent::Created { task_id: id, jobs: queued }]);

        info!(task_id = %id, jobs = queued, "task created");
        Ok(id)
    }

    /// Get a task by id.
    pub fn get_task(&self, id: &TaskId) -> QueueResult<Task> {
        self.load(id)
    }

    /// Current job list of a task, whatever its status.
    pub fn get_results(&self, id: &TaskId) -> QueueResult<Vec<Job>> {
        Ok(self.load(id)?.jobs)
    }

    /// List tasks newest first.
    pub fn list_tasks(&self, query: &TaskQuery) -> QueueResult<Page<Task>> {
        let mut tasks: Vec<Task> = self
            .snapshot()?
            .into_iter()
            .filter(|t| query.status.is_none_or(|s| t.status == s))
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = tasks.len();
        let limit = query.effective_limit();
        let items = tasks.into_iter().skip(query.offset).take(limit).collect();
        Ok(Page {
            items,
            total,
            offset: query.offset,
            limit,
        })
    }

    /// Copy of every task record.
    ///
    /// The copy is taken between commits, so counts derived from it describe a
    /// state the queue actually passed through.
    pub fn snapshot(&self) -> QueueResult<Vec<Task>> {
        let _epoch = self.commits.write();
        self.store.list()
    }

    /// Cancel a task none of whose jobs has started.
    ///
    /// Cancelling a task with a running or finished job is rejected with
    /// `InvalidState`; in-flight jobs cannot be aborted.
    pub fn cancel_task(&self, id: &TaskId) -> QueueResult<Task> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();
        let mut task = self.load(id)?;

        if task.status != TaskStatus::Pending || task.has_started_jobs() {
            return Err(QueueError::InvalidState(format!(
                "task {id} is {}; only tasks with no started jobs can be cancelled",
                task.status
            )));
        }

        let now = Utc::now();
        debug_assert!(task.status.can_transition_to(TaskStatus::Cancelled));
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(now);
        task.updated_at = now;
        self.commit(task.clone())?;
        let purged = self.intake.purge_task(id);
        self.events.publish_all(vec![TaskEvent::StatusChanged {
            task_id: *id,
            from: TaskStatus::Pending,
            to: TaskStatus::Cancelled,
        }]);

        info!(task_id = %id, purged, "task cancelled");
        Ok(task)
    }

    /// Re-queue the failed jobs of a `Failed` or `Partial` task.
    ///
    /// Completed jobs keep their results. State is unchanged on error.
    pub fn retry_task(&self, id: &TaskId) -> QueueResult<Task> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();
        let mut task = self.load(id)?;

        if !task.status.is_retryable() {
            return Err(QueueError::InvalidState(format!(
                "task {id} is {}; only failed or partial tasks can be retried",
                task.status
            )));
        }
        if task.retry_count >= self.config.max_retries {
            return Err(QueueError::RetryLimitExceeded {
                task_id: id.to_string(),
                max_retries: self.config.max_retries,
            });
        }

        let from = task.status;
        let mut tickets = Vec::new();
        for job in task.jobs.iter_mut().filter(|j| j.status != JobStatus::Completed) {
            job.reset();
            tickets.push(JobTicket {
                task_id: *id,
                job_index: job.index,
            });
        }
        task.retry_count += 1;
        debug_assert!(from.can_transition_to(TaskStatus::Pending));
        task.status = TaskStatus::Pending;
        task.started_at = None;
        task.completed_at = None;
        task.processing_time_ms = None;
        task.updated_at = Utc::now();

        self.commit(task.clone())?;
        let queued = self.intake.push_batch(tickets);
        self.events.publish_all(vec![TaskEvent::StatusChanged {
            task_id: *id,
            from,
            to: TaskStatus::Pending,
        }]);

        info!(task_id = %id, retry = task.retry_count, jobs = queued, "task re-queued");
        Ok(task)
    }

    /// Remove a task in a terminal status.
    pub fn delete_task(&self, id: &TaskId) -> QueueResult<Task> {
        let lock = self.lock_for(id);
        let removed = {
            let _guard = lock.lock();
            let task = self.load(id)?;
            if !task.status.is_terminal() {
                return Err(QueueError::InvalidState(format!(
                    "task {id} is {}; only finished tasks can be deleted",
                    task.status
                )));
            }
            let removed = {
                let _epoch = self.commits.read();
                self.store.remove(id)?.unwrap_or(task)
            };
            self.events
                .publish_all(vec![TaskEvent::Deleted { task_id: *id }]);
            removed
        };
        self.locks.remove(id);

        info!(task_id = %id, "task deleted");
        Ok(removed)
    }

    /// Wait until a task reaches a terminal status.
    pub async fn wait_for_task(&self, id: &TaskId, timeout: Duration) -> QueueResult<Task> {
        let mut revision = self.events.watch_revision();
        let wait = async {
            loop {
                let task = self.load(id)?;
                if task.status.is_terminal() {
                    return Ok(task);
                }
                if revision.changed().await.is_err() {
                    return Err(QueueError::ShuttingDown);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| QueueError::Timeout(timeout))?
    }

    // =======================================================================
    // Worker-facing
    // =======================================================================

    /// Move a job from `Pending` to `Running`.
    ///
    /// Returns `None` if the job may no longer run: its task was cancelled or
    /// the job already left `Pending`.
    pub fn claim_job(&self, id: &TaskId, job_index: usize) -> QueueResult<Option<JobClaim>> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();
        let mut task = self.load(id)?;

        if task.status.is_terminal() {
            return Ok(None);
        }
        let now = Utc::now();
        let (file, attempt) = {
            let job = task.jobs.get_mut(job_index).ok_or_else(|| {
                QueueError::InvalidInput(format!("task {id} has no job {job_index}"))
            })?;
            if job.status != JobStatus::Pending {
                return Ok(None);
            }
            job.start(now);
            (job.file.clone(), job.attempts)
        };

        let mut events = vec![TaskEvent::JobStarted {
            task_id: *id,
            job_index,
            attempt,
        }];
        if task.status == TaskStatus::Pending {
            debug_assert!(task.status.can_transition_to(TaskStatus::Processing));
            task.status = TaskStatus::Processing;
            task.started_at = Some(now);
            events.push(TaskEvent::StatusChanged {
                task_id: *id,
                from: TaskStatus::Pending,
                to: TaskStatus::Processing,
            });
        }
        task.updated_at = now;
        let options = task.options.clone();

        self.commit(task)?;
        self.events.publish_all(events);

        debug!(task_id = %id, job_index, attempt, "job claimed");
        Ok(Some(JobClaim {
            file,
            options,
            attempt,
        }))
    }

    /// Record how a running job ended and re-derive the task status.
    ///
    /// Outcomes for a job that is not `Running`, or for a task that is already
    /// terminal, are ignored. Returns the task status after the update.
    pub fn record_job_outcome(
        &self,
        id: &TaskId,
        job_index: usize,
        outcome: JobOutcome,
    ) -> QueueResult<TaskStatus> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();
        let mut task = self.load(id)?;

        if task.status.is_terminal() {
            warn!(task_id = %id, job_index, status = %task.status, "late outcome for finished task ignored");
            return Ok(task.status);
        }
        let now = Utc::now();
        let job_status = {
            let job = task.jobs.get_mut(job_index).ok_or_else(|| {
                QueueError::InvalidInput(format!("task {id} has no job {job_index}"))
            })?;
            if job.status != JobStatus::Running {
                warn!(task_id = %id, job_index, status = %job.status, "outcome for job that is not running ignored");
                return Ok(task.status);
            }
            match outcome {
                JobOutcome::Completed {
                    output,
                    processing_time_ms,
                } => job.complete(output, processing_time_ms, now),
                JobOutcome::Failed {
                    error,
                    processing_time_ms,
                } => job.fail(error.to_string(), processing_time_ms, now),
            }
            job.status
        };

        let mut events = vec![TaskEvent::JobFinished {
            task_id: *id,
            job_index,
            status: job_status,
        }];
        let from = task.status;
        if let Some(next) = task.derive_status() {
            if next != from {
                debug_assert!(from.can_transition_to(next), "{from} -> {next}");
                if next.is_terminal() {
                    task.finish(next, now);
                } else {
                    task.status = next;
                }
                events.push(TaskEvent::StatusChanged {
                    task_id: *id,
                    from,
                    to: next,
                });
            }
        }
        task.updated_at = now;
        let status = task.status;

        self.commit(task)?;
        self.events.publish_all(events);

        if status.is_terminal() {
            info!(task_id = %id, %status, "task finished");
        }
        Ok(status)
    }
}
