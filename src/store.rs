//! Task record storage.
//!
//! The store is a plain key-value map from [`TaskId`] to [`Task`]. It holds no
//! business logic and performs no locking beyond what keeps a single `get` or
//! `put` atomic; read-modify-write sequences are serialized per task by the
//! [`TaskQueueManager`](crate::TaskQueueManager), which also keeps `list`
//! from interleaving with writes.
//!
//! Store calls are synchronous. They are expected to be fast and are never
//! made while a worker is waiting on the file processor.

use dashmap::DashMap;

use crate::error::QueueResult;
use crate::task::{Task, TaskId};

/// Durable or in-memory storage of task records.
pub trait TaskRecordStore: Send + Sync {
    /// Fetch a copy of a task record.
    fn get(&self, id: &TaskId) -> QueueResult<Option<Task>>;

    /// Insert or replace a task record.
    fn put(&self, task: Task) -> QueueResult<()>;

    /// Copy every task record. Each record is internally consistent.
    fn list(&self) -> QueueResult<Vec<Task>>;

    /// Remove a task record, returning it if it existed.
    fn remove(&self, id: &TaskId) -> QueueResult<Option<Task>>;

    /// Number of stored tasks.
    fn len(&self) -> QueueResult<usize>;

    /// Check if the store is empty.
    fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Sharded in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskRecordStore for InMemoryTaskStore {
    fn get(&self, id: &TaskId) -> QueueResult<Option<Task>> {
        Ok(self.tasks.get(id).map(|entry| entry.value().clone()))
    }

    fn put(&self, task: Task) -> QueueResult<()> {
        self.tasks.insert(task.id, task);
        Ok(())
    }

    fn list(&self) -> QueueResult<Vec<Task>> {
        Ok(self.tasks.iter().map(|entry| entry.value().clone()).collect())
    }

    fn remove(&self, id: &TaskId) -> QueueResult<Option<Task>> {
        Ok(self.tasks.remove(id).map(|(_, task)| task))
    }

    fn len(&self) -> QueueResult<usize> {
        Ok(self.tasks.len())
    }
}
