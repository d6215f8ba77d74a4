//! The batch queue service.
//!
//! [`BatchQueue`] wires a [`TaskRecordStore`], a [`TaskQueueManager`] and a
//! [`WorkerPool`] together from one [`QueueConfig`] and exposes the operations
//! an API layer needs.
//!
//! ```ignore
//! let queue = BatchQueue::new(QueueConfig::default(), Arc::new(MyProcessor))?;
//! let created = queue.create_task(files, TaskOptions::new("fr"))?;
//! let task = queue.wait_for_task(&created.id, Duration::from_secs(600)).await?;
//! println!("{}", queue.export_results(&task.id, ExportFormat::Markdown)?);
//! queue.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::event::TaskEvent;
use crate::export::{ExportFormat, export_task};
use crate::job::{FileInput, Job};
use crate::manager::{Page, TaskQuery, TaskQueueManager};
use crate::processor::FileProcessor;
use crate::scheduler::{JobIntake, WorkerPool};
use crate::stats::{QueueStats, TaskProgress, compute_stats};
use crate::store::{InMemoryTaskStore, TaskRecordStore};
use crate::task::{Task, TaskId, TaskOptions, TaskStatus};

/// Reply to a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreated {
    /// New task id.
    pub id: TaskId,
    /// Initial status, always `Pending`.
    pub status: TaskStatus,
}

/// Batch document-processing queue with a running worker pool.
#[derive(Debug)]
pub struct BatchQueue {
    manager: Arc<TaskQueueManager>,
    pool: Mutex<Option<WorkerPool>>,
    shutdown: CancellationToken,
}

impl BatchQueue {
    /// Start a queue backed by an in-memory store.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: QueueConfig, processor: Arc<dyn FileProcessor>) -> QueueResult<Self> {
        Self::with_store(config, Arc::new(InMemoryTaskStore::new()), processor)
    }

    /// Start a queue backed by `store`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_store(
        config: QueueConfig,
        store: Arc<dyn TaskRecordStore>,
        processor: Arc<dyn FileProcessor>,
    ) -> QueueResult<Self> {
        config.validate()?;
        let workers = config.worker_count;
        let job_timeout = config.job_timeout;

        let intake = Arc::new(JobIntake::new());
        let manager = Arc::new(TaskQueueManager::new(store, intake, config));
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(
            Arc::clone(&manager),
            processor,
            workers,
            job_timeout,
            shutdown.child_token(),
        );

        Ok(Self {
            manager,
            pool: Mutex::new(Some(pool)),
            shutdown,
        })
    }

    /// The underlying manager.
    pub fn manager(&self) -> &Arc<TaskQueueManager> {
        &self.manager
    }

    /// The configuration in effect.
    pub fn config(&self) -> &QueueConfig {
        self.manager.config()
    }

    fn ensure_running(&self) -> QueueResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::ShuttingDown);
        }
        Ok(())
    }

    /// Submit a batch of files.
    pub fn create_task(&self, files: Vec<FileInput>, options: TaskOptions) -> QueueResult<TaskCreated> {
        self.ensure_running()?;
        let id = self.manager.create_task(files, options)?;
        Ok(TaskCreated {
            id,
            status: TaskStatus::Pending,
        })
    }

    /// Get a task.
    pub fn get_task(&self, id: &TaskId) -> QueueResult<Task> {
        self.manager.get_task(id)
    }

    /// List tasks newest first.
    pub fn list_tasks(&self, query: &TaskQuery) -> QueueResult<Page<Task>> {
        self.manager.list_tasks(query)
    }

    /// Current per-file results of a task.
    pub fn get_results(&self, id: &TaskId) -> QueueResult<Vec<Job>> {
        self.manager.get_results(id)
    }

    /// Cancel a task that has not started.
    pub fn cancel_task(&self, id: &TaskId) -> QueueResult<Task> {
        self.manager.cancel_task(id)
    }

    /// Retry the failed files of a finished task.
    pub fn retry_task(&self, id: &TaskId) -> QueueResult<Task> {
        self.ensure_running()?;
        self.manager.retry_task(id)
    }

    /// Delete a finished task.
    pub fn delete_task(&self, id: &TaskId) -> QueueResult<Task> {
        self.manager.delete_task(id)
    }

    /// Progress of one task.
    pub fn task_progress(&self, id: &TaskId) -> QueueResult<TaskProgress> {
        Ok(TaskProgress::of(&self.manager.get_task(id)?))
    }

    /// System-wide statistics.
    pub fn stats(&self) -> QueueResult<QueueStats> {
        let tasks = self.manager.snapshot()?;
        Ok(compute_stats(&tasks, self.config().worker_count))
    }

    /// Render a finished task's outcomes.
    pub fn export_results(&self, id: &TaskId, format: ExportFormat) -> QueueResult<String> {
        export_task(&self.manager.get_task(id)?, format)
    }

    /// Subscribe to task state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.manager.subscribe()
    }

    /// Wait until a task reaches a terminal status.
    pub async fn wait_for_task(&self, id: &TaskId, timeout: Duration) -> QueueResult<Task> {
        self.manager.wait_for_task(id, timeout).await
    }

    /// Stop the worker pool. Running jobs finish and are recorded; queued jobs
    /// stay `Pending`. Further submissions fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.shutdown().await;
            info!("batch queue shut down");
        }
    }
}

impl Drop for BatchQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::JobContext;
    use crate::result::ProcessOutput;
    use async_trait::async_trait;

    struct Immediate;

    #[async_trait]
    impl FileProcessor for Immediate {
        fn name(&self) -> &str {
            "immediate"
        }

        async fn process(
            &self,
            _ctx: &JobContext,
            file: &FileInput,
            _options: &TaskOptions,
        ) -> QueueResult<ProcessOutput> {
            Ok(ProcessOutput::new(format!("done/{}", file.file_ref)))
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let err = BatchQueue::new(QueueConfig::default().with_workers(0), Arc::new(Immediate))
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_end_to_end_and_shutdown() {
        let queue = BatchQueue::new(QueueConfig::default().with_workers(2), Arc::new(Immediate)).unwrap();
        let created = queue
            .create_task(
                vec![FileInput::new("a.md", "a"), FileInput::new("b.md", "b")],
                TaskOptions::new("it"),
            )
            .unwrap();
        assert_eq!(created.status, TaskStatus::Pending);

        let task = queue
            .wait_for_task(&created.id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(queue.task_progress(&task.id).unwrap().percentage, 100);

        let stats = queue.stats().unwrap();
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.queue_length, 0);
        assert_eq!(stats.worker_count, 2);

        queue.shutdown().await;
        let err = queue
            .create_task(vec![FileInput::new("c.md", "c")], TaskOptions::new("it"))
            .unwrap_err();
        assert_eq!(err, QueueError::ShuttingDown);
        // Reads still work after shutdown.
        assert!(queue.export_results(&task.id, ExportFormat::Json).is_ok());
    }
}
