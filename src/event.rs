//! Task state-change events.
//!
//! Every mutation the manager commits is announced twice: as a typed
//! [`TaskEvent`] on a broadcast channel for push layers (websocket fan-out and
//! the like), and as a bump of a revision counter that local waiters watch.
//! Events are published after the record is stored, so a subscriber that reacts
//! by reading the task always sees the new state.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::job::JobStatus;
use crate::task::{TaskId, TaskStatus};

/// A committed task state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A task was accepted.
    Created {
        /// New task.
        task_id: TaskId,
        /// Number of jobs.
        jobs: usize,
    },
    /// A worker slot claimed a job.
    JobStarted {
        /// Parent task.
        task_id: TaskId,
        /// Job position.
        job_index: usize,
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// A job reached a terminal status.
    JobFinished {
        /// Parent task.
        task_id: TaskId,
        /// Job position.
        job_index: usize,
        /// `Completed` or `Failed`.
        status: JobStatus,
    },
    /// The task moved between statuses.
    StatusChanged {
        /// Task.
        task_id: TaskId,
        /// Previous status.
        from: TaskStatus,
        /// New status.
        to: TaskStatus,
    },
    /// The task was removed from the store.
    Deleted {
        /// Removed task.
        task_id: TaskId,
    },
}

impl TaskEvent {
    /// Task the event refers to.
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Created { task_id, .. }
            | TaskEvent::JobStarted { task_id, .. }
            | TaskEvent::JobFinished { task_id, .. }
            | TaskEvent::StatusChanged { task_id, .. }
            | TaskEvent::Deleted { task_id } => *task_id,
        }
    }
}

#[derive(Debug)]
pub(crate) struct EventBus {
    events: broadcast::Sender<TaskEvent>,
    revision: watch::Sender<u64>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (revision, _) = watch::channel(0);
        Self { events, revision }
    }

    pub(crate) fn publish_all(&self, events: Vec<TaskEvent>) {
        if events.is_empty() {
            return;
        }
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub(crate) fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber_and_bumps_revision() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let mut rev = bus.watch_revision();
        let id = TaskId::new();

        bus.publish_all(vec![TaskEvent::Created { task_id: id, jobs: 2 }]);

        assert_eq!(rx.recv().await.unwrap(), TaskEvent::Created { task_id: id, jobs: 2 });
        assert!(rev.has_changed().unwrap());
        assert_eq!(*rev.borrow_and_update(), 1);
        assert!(!rev.has_changed().unwrap());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(1);
        bus.publish_all(vec![TaskEvent::Deleted { task_id: TaskId::new() }]);
        bus.publish_all(Vec::new());
        assert_eq!(*bus.watch_revision().borrow(), 1);
    }

    #[test]
    fn test_event_serializes_tagged() {
        let id = TaskId::new();
        let json = serde_json::to_value(TaskEvent::StatusChanged {
            task_id: id,
            from: TaskStatus::Pending,
            to: TaskStatus::Processing,
        })
        .unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["to"], "processing");
        assert_eq!(TaskEvent::Deleted { task_id: id }.task_id(), id);
    }
}
