//! Per-file processing results.

use serde::{Deserialize, Serialize};

/// Success payload of one file processor invocation.
///
/// The queue never interprets this beyond carrying it on the job and
/// rendering `output_ref` in exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Reference to the primary artifact (translated or generated document).
    pub output_ref: String,
    /// Reference to the secondary artifact, when one was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_ref: Option<String>,
    /// Short human-readable summary from the processor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Additional processor-specific metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ProcessOutput {
    /// Create a new output pointing at `output_ref`.
    pub fn new(output_ref: impl Into<String>) -> Self {
        Self {
            output_ref: output_ref.into(),
            secondary_ref: None,
            summary: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Set the secondary artifact reference.
    pub fn with_secondary(mut self, secondary_ref: impl Into<String>) -> Self {
        self.secondary_ref = Some(secondary_ref.into());
        self
    }

    /// Set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Set metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
