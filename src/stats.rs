//! Progress and queue statistics.
//!
//! Everything here is a pure function of a task snapshot. Nothing mutates
//! state, so these can run while workers keep recording outcomes.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::job::JobStatus;
use crate::task::{Task, TaskStatus};

/// Progress of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Number of jobs.
    pub total: usize,
    /// Jobs completed.
    pub completed: usize,
    /// Jobs failed.
    pub failed: usize,
    /// Jobs in flight.
    pub running: usize,
    /// Jobs waiting.
    pub pending: usize,
    /// `round(100 * (completed + failed) / total)`.
    pub percentage: u8,
}

impl TaskProgress {
    /// Compute progress from a task record.
    pub fn of(task: &Task) -> Self {
        let mut progress = Self {
            total: task.jobs.len(),
            completed: 0,
            failed: 0,
            running: 0,
            pending: 0,
            percentage: 0,
        };
        for job in &task.jobs {
            match job.status {
                JobStatus::Completed => progress.completed += 1,
                JobStatus::Failed => progress.failed += 1,
                JobStatus::Running => progress.running += 1,
                JobStatus::Pending => progress.pending += 1,
            }
        }
        progress.percentage = percentage(progress.completed + progress.failed, progress.total);
        progress
    }

    /// Jobs in a terminal state.
    pub fn done(&self) -> usize {
        self.completed + self.failed
    }
}

/// Half-up rounded percentage; zero when `total` is zero.
fn percentage(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (200 * done + total) / (2 * total);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// System-wide queue statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Pending jobs not yet claimed, across live tasks.
    pub queue_length: usize,
    /// Jobs currently running.
    pub running_jobs: usize,
    /// Worker slots configured.
    pub worker_count: usize,
    /// All stored tasks.
    pub total_tasks: usize,
    /// Tasks waiting for their first claim.
    pub pending_tasks: usize,
    /// Tasks in `Processing`.
    pub active_tasks: usize,
    /// Tasks in `Completed`.
    pub completed_tasks: usize,
    /// Tasks in `Failed`.
    pub failed_tasks: usize,
    /// Tasks in `Partial`.
    pub partial_tasks: usize,
    /// Tasks in `Cancelled`.
    pub cancelled_tasks: usize,
    /// Mean `processing_time_ms` over tasks that have one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_processing_time_ms: Option<f64>,
}

/// Aggregate statistics over a snapshot.
#[allow(clippy::cast_precision_loss)]
pub fn compute_stats(tasks: &[Task], worker_count: usize) -> QueueStats {
    let mut by_status: FxHashMap<TaskStatus, usize> = FxHashMap::default();
    let mut queue_length = 0;
    let mut running_jobs = 0;
    let mut timed = 0usize;
    let mut time_sum = 0u128;

    for task in tasks {
        *by_status.entry(task.status).or_default() += 1;
        if task.status != TaskStatus::Cancelled {
            queue_length += task.count_jobs(JobStatus::Pending);
        }
        running_jobs += task.count_jobs(JobStatus::Running);
        if let Some(ms) = task.processing_time_ms {
            timed += 1;
            time_sum += u128::from(ms);
        }
    }

    let count = |s: TaskStatus| by_status.get(&s).copied().unwrap_or(0);
    QueueStats {
        queue_length,
        running_jobs,
        worker_count,
        total_tasks: tasks.len(),
        pending_tasks: count(TaskStatus::Pending),
        active_tasks: count(TaskStatus::Processing),
        completed_tasks: count(TaskStatus::Completed),
        failed_tasks: count(TaskStatus::Failed),
        partial_tasks: count(TaskStatus::Partial),
        cancelled_tasks: count(TaskStatus::Cancelled),
        average_processing_time_ms: (timed > 0).then(|| time_sum as f64 / timed as f64),
    }
}
