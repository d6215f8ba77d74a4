//! Result export.
//!
//! Renders the per-file outcomes of a finished task. Only tasks whose jobs
//! have all reached a terminal state (`Completed`, `Partial`, `Failed`) can be
//! exported.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobStatus};
use crate::stats::TaskProgress;
use crate::task::{Task, TaskId, TaskOptions, TaskStatus};

/// Serialization for [`export_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Pretty-printed JSON document with task metadata.
    Json,
    /// One CSV row per file.
    Csv,
    /// Markdown report with a per-file table.
    Markdown,
}

impl ExportFormat {
    /// Conventional file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Markdown => "md",
        }
    }

    /// MIME type for HTTP responses.
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
            ExportFormat::Markdown => "text/markdown",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            other => Err(QueueError::InvalidInput(format!("unknown export format: {other}"))),
        }
    }
}

/// One exported file outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    /// Job position.
    pub index: usize,
    /// Original file name.
    pub file_name: String,
    /// Final job status.
    pub status: JobStatus,
    /// Primary artifact reference, if completed.
    pub output_ref: Option<String>,
    /// Secondary artifact reference, if produced.
    pub secondary_ref: Option<String>,
    /// Failure description, if failed.
    pub error: Option<String>,
    /// Processor wall time.
    pub processing_time_ms: Option<u64>,
    /// Number of dispatches.
    pub attempts: u32,
}

impl From<&Job> for ExportRow {
    fn from(job: &Job) -> Self {
        Self {
            index: job.index,
            file_name: job.file.file_name.clone(),
            status: job.status,
            output_ref: job.result.as_ref().map(|r| r.output_ref.clone()),
            secondary_ref: job.result.as_ref().and_then(|r| r.secondary_ref.clone()),
            error: job.error.clone(),
            processing_time_ms: job.processing_time_ms,
            attempts: job.attempts,
        }
    }
}

#[derive(Debug, Serialize)]
struct ExportDocument<'a> {
    task_id: TaskId,
    status: TaskStatus,
    options: &'a TaskOptions,
    retry_count: u32,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    processing_time_ms: Option<u64>,
    progress: TaskProgress,
    files: Vec<ExportRow>,
}

/// Render a finished task's outcomes.
pub fn export_task(task: &Task, format: ExportFormat) -> QueueResult<String> {
    if !matches!(
        task.status,
        TaskStatus::Completed | TaskStatus::Partial | TaskStatus::Failed
    ) {
        return Err(QueueError::InvalidState(format!(
            "task {} is {}; only finished tasks can be exported",
            task.id, task.status
        )));
    }

    let rows: Vec<ExportRow> = task.jobs.iter().map(ExportRow::from).collect();
    match format {
        ExportFormat::Json => to_json(task, rows),
        ExportFormat::Csv => to_csv(&rows),
        ExportFormat::Markdown => Ok(to_markdown(task, &rows)),
    }
}

fn to_json(task: &Task, files: Vec<ExportRow>) -> QueueResult<String> {
    let doc = ExportDocument {
        task_id: task.id,
        status: task.status,
        options: &task.options,
        retry_count: task.retry_count,
        created_at: task.created_at,
        completed_at: task.completed_at,
        processing_time_ms: task.processing_time_ms,
        progress: TaskProgress::of(task),
        files,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

fn to_csv(rows: &[ExportRow]) -> QueueResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| QueueError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| QueueError::Export(e.to_string()))
}

fn to_markdown(task: &Task, rows: &[ExportRow]) -> String {
    let progress = TaskProgress::of(task);
    let mut out = String::new();
    out.push_str(&format!("# Task {}\n\n", task.id));
    out.push_str(&format!("- Status: {}\n", task.status));
    out.push_str(&format!("- Target language: {}\n", task.options.target_language));
    out.push_str(&format!(
        "- Files: {} total, {} completed, {} failed\n",
        progress.total, progress.completed, progress.failed
    ));
    out.push_str(&format!("- Retries: {}\n", task.retry_count));
    if let Some(ms) = task.processing_time_ms {
        out.push_str(&format!("- Processing time: {ms} ms\n"));
    }
    out.push_str("\n| # | File | Status | Output | Error |\n|---|------|--------|--------|-------|\n");
    for row in rows {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            row.index,
            md_cell(&row.file_name),
            row.status,
            md_cell(row.output_ref.as_deref().unwrap_or("")),
            md_cell(row.error.as_deref().unwrap_or("")),
        ));
    }
    out
}

fn md_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FileInput;
    use crate::result::ProcessOutput;

    fn finished_partial() -> Task {
        let mut task = Task::new(
            vec![
                FileInput::new("intro.docx", "blob/1"),
                FileInput::new("a|b.pdf", "blob/2"),
            ],
            TaskOptions::new("fr"),
        );
        let now = Utc::now();
        task.jobs[0].start(now);
        task.jobs[0].complete(
            ProcessOutput::new("out/intro.fr.docx").with_secondary("out/intro.fr.pdf"),
            40,
            now,
        );
        task.jobs[1].start(now);
        task.jobs[1].fail("Processing failed: scanned image".into(), 12, now);
        task.status = TaskStatus::Partial;
        task
    }

    #[test]
    fn test_export_requires_finished_task() {
        let task = Task::new(vec![FileInput::new("x.txt", "x")], TaskOptions::new("fr"));
        let err = export_task(&task, ExportFormat::Json).unwrap_err();
        assert!(matches!(err, QueueError::InvalidState(_)));
    }

    #[test]
    fn test_export_json() {
        let task = finished_partial();
        let out = export_task(&task, ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["status"], "partial");
        assert_eq!(value["progress"]["completed"], 1);
        assert_eq!(value["files"][0]["output_ref"], "out/intro.fr.docx");
        assert_eq!(value["files"][1]["status"], "failed");
    }

    #[test]
    fn test_export_csv() {
        let out = export_task(&finished_partial(), ExportFormat::Csv).unwrap();
        let mut lines = out.lines();
        assert_eq!(
            lines.next(),
            Some("index,file_name,status,output_ref,secondary_ref,error,processing_time_ms,attempts")
        );
        assert_eq!(
            lines.next(),
            Some("0,intro.docx,completed,out/intro.fr.docx,out/intro.fr.pdf,,40,1")
        );
        assert!(lines.next().unwrap().contains("scanned image"));
    }

    #[test]
    fn test_export_markdown_escapes_pipes() {
        let out = export_task(&finished_partial(), ExportFormat::Markdown).unwrap();
        assert!(out.contains("- Status: partial"));
        assert!(out.contains("a\\|b.pdf"));
        assert!(out.contains("| 0 | intro.docx | completed | out/intro.fr.docx |  |"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("MD".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert_eq!(ExportFormat::Csv.extension(), "csv");
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
