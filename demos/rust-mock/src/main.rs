//! Minimal mock translator driving a batch queue.
//!
//! Files whose reference contains `corrupt` fail on their first attempt, so
//! the batch ends `Partial` and a retry brings it to `Completed`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use doc_batch_queue::{
    BatchQueue, ExportFormat, FileInput, FileProcessor, JobContext, ProcessOutput, QueueConfig,
    QueueError, QueueResult, TaskOptions,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pretends to translate a document.
struct MockTranslator;

#[async_trait]
impl FileProcessor for MockTranslator {
    fn name(&self) -> &str {
        "mock-translator"
    }

    async fn process(
        &self,
        ctx: &JobContext,
        file: &FileInput,
        options: &TaskOptions,
    ) -> QueueResult<ProcessOutput> {
        tokio::time::sleep(Duration::from_millis(50 * (ctx.job_index as u64 + 1))).await;

        if file.file_ref.contains("corrupt") && ctx.attempt == 1 {
            return Err(QueueError::Processing(format!(
                "could not parse {}",
                file.file_name
            )));
        }

        let stem = file.file_name.rsplit_once('.').map_or(file.file_name.as_str(), |(s, _)| s);
        let mut output = ProcessOutput::new(format!(
            "translated/{stem}.{}.{}",
            options.target_language, options.output_format
        ))
        .with_summary(format!("{} translated to {}", file.file_name, options.target_language));
        if options.generate_secondary {
            output = output.with_secondary(format!("translated/{stem}.{}.pdf", options.target_language));
        }
        Ok(output)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_batch_queue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = QueueConfig::default()
        .with_workers(2)
        .with_job_timeout(Duration::from_secs(5));
    let queue = BatchQueue::new(config, Arc::new(MockTranslator))?;

    println!("Workers: {}", queue.config().worker_count);
    println!();

    let files = vec![
        FileInput::new("contract.docx", "uploads/contract").with_size(48_213),
        FileInput::new("scan.pdf", "uploads/scan-corrupt").with_size(1_204_551),
        FileInput::new("notes.md", "uploads/notes").with_size(2_048),
    ];
    let options = TaskOptions::new("fr")
        .with_source_language("en")
        .with_secondary(true);

    let created = queue.create_task(files, options)?;
    println!("Task ID: {}", created.id);

    let task = queue.wait_for_task(&created.id, Duration::from_secs(60)).await?;
    let progress = queue.task_progress(&task.id)?;
    println!(
        "Status:  {} ({}/{} completed, {} failed)",
        task.status, progress.completed, progress.total, progress.failed
    );
    println!();
    println!("{}", queue.export_results(&task.id, ExportFormat::Markdown)?);

    // Retry the failed file
    queue.retry_task(&task.id)?;
    let task = queue.wait_for_task(&task.id, Duration::from_secs(60)).await?;
    println!("After retry: {} (retries: {})", task.status, task.retry_count);
    println!();

    let stats = queue.stats()?;
    println!("Tasks:   {} total, {} completed", stats.total_tasks, stats.completed_tasks);
    if let Some(avg) = stats.average_processing_time_ms {
        println!("Average: {avg:.0}ms");
    }

    queue.shutdown().await;
    Ok(())
}
