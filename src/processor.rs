//! File processor trait.
//!
//! The [`FileProcessor`] is the external collaborator that does the real work
//! for one file: parsing, translation, generation. The queue calls it once per
//! job attempt:
//!
//! ```text
//!   claim_job() ──→ process(ctx, file, options) ──→ record_job_outcome()
//!   (manager)        (async, under deadline)          (manager)
//! ```
//!
//! ## Contract
//!
//! - **Async-native**: `process()` may be slow; it is the only place a worker
//!   slot suspends.
//! - **Thread-safe**: `Send + Sync` so one processor is shared by every slot.
//! - **Deadline-aware**: the queue drops the future once
//!   [`JobContext::deadline`] passes. Implementations doing blocking work
//!   SHOULD check [`JobContext::remaining`] themselves.
//! - **Errors stay local**: an `Err` fails this job only; sibling jobs in the
//!   same task keep running.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::QueueResult;
use crate::job::FileInput;
use crate::result::ProcessOutput;
use crate::task::{TaskId, TaskOptions};

/// Per-invocation context handed to the processor.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Task the job belongs to.
    pub task_id: TaskId,
    /// Position of the job within the task.
    pub job_index: usize,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Point in time after which the result is discarded.
    pub deadline: Instant,
}

impl JobContext {
    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Trait for per-file processors.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    /// Name of this processor, used in logs.
    fn name(&self) -> &str;

    /// Process one file with the task's options.
    async fn process(
        &self,
        ctx: &JobContext,
        file: &FileInput,
        options: &TaskOptions,
    ) -> QueueResult<ProcessOutput>;
}
