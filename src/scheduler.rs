//! Worker pool scheduler.
//!
//! One shared FIFO [`JobIntake`] feeds a fixed number of worker slots. Tickets
//! are ordered by submission and then by job index, so a large task cannot
//! starve tasks submitted after it from ever being reached; slots interleave
//! across tasks in arrival order.
//!
//! ```text
//!   create_task / retry_task ──push──→ JobIntake ──pop──→ slot 0..W
//!                                         │                  │
//!                                         └─ notify_one ─────┘
//!   slot: claim_job() → process() under deadline → record_job_outcome()
//! ```
//!
//! Slots are driven by availability: an idle slot parks on a [`Notify`] and is
//! woken by the next push. A slot that pops a ticket while more remain wakes a
//! sibling, so a burst of tickets fans out across every idle slot.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::QueueError;
use crate::manager::{JobOutcome, TaskQueueManager};
use crate::processor::{FileProcessor, JobContext};
use crate::task::TaskId;

/// Intake queue entry naming one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobTicket {
    /// Parent task.
    pub task_id: TaskId,
    /// Job position within the task.
    pub job_index: usize,
}

/// Shared FIFO of job tickets.
#[derive(Debug, Default)]
pub struct JobIntake {
    queue: Mutex<VecDeque<JobTicket>>,
    available: Notify,
}

impl JobIntake {
    /// Create an empty intake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append tickets in order and wake idle slots. Returns how many were added.
    pub fn push_batch(&self, tickets: impl IntoIterator<Item = JobTicket>) -> usize {
        let added = {
            let mut queue = self.queue.lock();
            let before = queue.len();
            queue.extend(tickets);
            queue.len() - before
        };
        if added > 0 {
            self.available.notify_one();
        }
        added
    }

    /// Take the oldest ticket.
    pub fn pop(&self) -> Option<JobTicket> {
        let (ticket, more) = {
            let mut queue = self.queue.lock();
            let ticket = queue.pop_front();
            (ticket, !queue.is_empty())
        };
        if ticket.is_some() && more {
            self.available.notify_one();
        }
        ticket
    }

    /// Drop every ticket belonging to `task_id`. Returns how many were removed.
    pub fn purge_task(&self, task_id: &TaskId) -> usize {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|t| t.task_id != *task_id);
        before - queue.len()
    }

    /// Number of queued tickets.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Check if no tickets are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Copy of the queued tickets, oldest first.
    pub fn snapshot(&self) -> Vec<JobTicket> {
        self.queue.lock().iter().copied().collect()
    }

    async fn wait(&self) {
        self.available.notified().await;
    }
}

/// Fixed-size set of worker slots draining a [`JobIntake`].
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `size` slots on the current tokio runtime.
    ///
    /// Slots stop when `shutdown` is cancelled: idle slots immediately, busy
    /// slots after recording the job they are running.
    pub fn spawn(
        manager: Arc<TaskQueueManager>,
        processor: Arc<dyn FileProcessor>,
        size: usize,
        job_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        info!(
            workers = size,
            processor = processor.name(),
            timeout_ms = job_timeout.as_millis() as u64,
            "starting worker pool"
        );
        let handles = (0..size)
            .map(|slot| {
                let manager = Arc::clone(&manager);
                let processor = Arc::clone(&processor);
                let shutdown = shutdown.clone();
                tokio::spawn(
                    run_slot(manager, processor, job_timeout, shutdown)
                        .instrument(info_span!("worker", slot)),
                )
            })
            .collect();
        Self { handles, shutdown }
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stop accepting tickets and wait for every slot to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("worker slot ended abnormally: {e}");
            }
        }
        info!("worker pool stopped");
    }
}

async fn run_slot(
    manager: Arc<TaskQueueManager>,
    processor: Arc<dyn FileProcessor>,
    job_timeout: Duration,
    shutdown: CancellationToken,
) {
    debug!("slot started");
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        if let Some(ticket) = manager.intake().pop() {
            run_ticket(&manager, processor.as_ref(), job_timeout, ticket).await;
            continue;
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = manager.intake().wait() => {}
        }
    }
    debug!("slot stopped");
}

async fn run_ticket(
    manager: &TaskQueueManager,
    processor: &dyn FileProcessor,
    job_timeout: Duration,
    ticket: JobTicket,
) {
    let JobTicket { task_id, job_index } = ticket;

    let claim = match manager.claim_job(&task_id, job_index) {
        Ok(Some(claim)) => claim,
        Ok(None) => {
            debug!(%task_id, job_index, "ticket no longer runnable, skipping");
            return;
        }
        Err(e) => {
            warn!(%task_id, job_index, "failed to claim job: {e}");
            return;
        }
    };

    let ctx = JobContext {
        task_id,
        job_index,
        attempt: claim.attempt,
        deadline: Instant::now() + job_timeout,
    };
    let started = Instant::now();
    let call = AssertUnwindSafe(processor.process(&ctx, &claim.file, &claim.options)).catch_unwind();

    let result = match tokio::time::timeout_at(ctx.deadline, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(QueueError::Processing("file processor panicked".into())),
        Err(_) => Err(QueueError::Timeout(job_timeout)),
    };
    let processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let outcome = match result {
        Ok(output) => {
            debug!(%task_id, job_index, processing_time_ms, "job completed");
            JobOutcome::Completed {
                output,
                processing_time_ms,
            }
        }
        Err(error) => {
            warn!(%task_id, job_index, processing_time_ms, file = %claim.file.file_name, "job failed: {error}");
            JobOutcome::Failed {
                error,
                processing_time_ms,
            }
        }
    };

    if let Err(e) = manager.record_job_outcome(&task_id, job_index, outcome) {
        warn!(%task_id, job_index, "failed to record job outcome: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(task_id: TaskId, job_index: usize) -> JobTicket {
        JobTicket { task_id, job_index }
    }

    #[test]
    fn test_intake_fifo_order() {
        let intake = JobIntake::new();
        let a = TaskId::new();
        let b = TaskId::new();

        assert_eq!(intake.push_batch([ticket(a, 0), ticket(a, 1)]), 2);
        assert_eq!(intake.push_batch([ticket(b, 0)]), 1);

        assert_eq!(intake.pop(), Some(ticket(a, 0)));
        assert_eq!(intake.pop(), Some(ticket(a, 1)));
        assert_eq!(intake.pop(), Some(ticket(b, 0)));
        assert_eq!(intake.pop(), None);
    }

    #[test]
    fn test_intake_purge_task() {
        let intake = JobIntake::new();
        let a = TaskId::new();
        let b = TaskId::new();
        intake.push_batch([ticket(a, 0), ticket(b, 0), ticket(a, 1)]);

        assert_eq!(intake.purge_task(&a), 2);
        assert_eq!(intake.snapshot(), vec![ticket(b, 0)]);
        assert_eq!(intake.purge_task(&a), 0);
        assert_eq!(intake.len(), 1);
    }

    #[tokio::test]
    async fn test_push_wakes_waiter() {
        let intake = Arc::new(JobIntake::new());
        let waiter = {
            let intake = Arc::clone(&intake);
            tokio::spawn(async move {
                loop {
                    if let Some(t) = intake.pop() {
                        return t;
                    }
                    intake.wait().await;
                }
            })
        };

        tokio::task::yield_now().await;
        let id = TaskId::new();
        intake.push_batch([ticket(id, 3)]);

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, ticket(id, 3));
        assert!(intake.is_empty());
    }

    #[test]
    fn test_push_empty_batch_is_noop() {
        let intake = JobIntake::new();
        assert_eq!(intake.push_batch(std::iter::empty()), 0);
        assert!(intake.is_empty());
    }
}
