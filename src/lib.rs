//! doc-batch-queue — Batch Document-Processing Task Queue
//!
//! This crate runs batches of uploaded documents through an external
//! [`FileProcessor`] (parser, translator, generator) with bounded concurrency,
//! per-file outcome tracking, whole-task retry, cancellation of unstarted
//! tasks, and partial-success results.
//!
//! # Overview
//!
//! The crate provides:
//! - [`BatchQueue`], the service facade used by an API layer
//! - [`TaskQueueManager`] as the sole owner of task/job state transitions
//! - [`WorkerPool`] / [`JobIntake`] for `W` slots draining one FIFO of job tickets
//! - [`TaskRecordStore`] / [`InMemoryTaskStore`] for key-value task records
//! - [`TaskProgress`] / [`QueueStats`] for read-side aggregation
//! - [`QueueError`] with structural, job-level, and infrastructure variants
//!
//! # The FileProcessor Trait
//!
//! ```ignore
//! use doc_batch_queue::{FileProcessor, FileInput, JobContext, ProcessOutput, QueueResult, TaskOptions};
//! use async_trait::async_trait;
//!
//! struct Translator { /* ... */ }
//!
//! #[async_trait]
//! impl FileProcessor for Translator {
//!     fn name(&self) -> &str { "translator" }
//!     async fn process(&self, ctx: &JobContext, file: &FileInput, options: &TaskOptions)
//!         -> QueueResult<ProcessOutput> { /* ... */ }
//! }
//! ```
//!
//! # Lifecycle
//!
//! ```text
//!   create_task() ──→ Pending ──→ Processing ──→ Completed | Failed | Partial
//!        │               │                              │
//!        │               └──→ Cancelled                 └── retry_task() ──→ Pending
//!        └── InvalidInput (nothing stored)
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod export;
pub mod job;
pub mod manager;
pub mod processor;
pub mod queue;
pub mod result;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod task;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use event::TaskEvent;
pub use export::{ExportFormat, ExportRow, export_task};
pub use job::{FileInput, Job, JobStatus};
pub use manager::{JobClaim, JobOutcome, Page, TaskQuery, TaskQueueManager};
pub use processor::{FileProcessor, JobContext};
pub use queue::{BatchQueue, TaskCreated};
pub use result::ProcessOutput;
pub use scheduler::{JobIntake, JobTicket, WorkerPool};
pub use stats::{QueueStats, TaskProgress, compute_stats};
pub use store::{InMemoryTaskStore, TaskRecordStore};
pub use task::{Task, TaskId, TaskOptions, TaskStatus};
