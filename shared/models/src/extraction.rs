//! Result envelope returned by an extraction run.

use serde::{Deserialize, Serialize};

use crate::milestone::{Deliverable, Milestone};

pub const EXTRACTION_METHOD: &str = "enhanced_table_extraction";

/// Outcome of forwarding milestones to the downstream tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// True when the tracker is not configured and nothing was sent.
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub processing_confidence: f64,
    pub tables_found: usize,
    pub milestone_tables_identified: usize,
    pub markdown_saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestones_extracted: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliverables_extracted: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<SyncStatus>,
}

/// The envelope handed back to callers. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub milestones: Vec<Milestone>,
    pub deliverables: Vec<Deliverable>,
    pub metadata: ProcessingMetadata,
}

impl ExtractionResult {
    /// Returns a new envelope carrying the given sync outcome.
    pub fn with_sync_status(self, status: SyncStatus) -> Self {
        Self {
            metadata: ProcessingMetadata {
                sync_status: Some(status),
                ..self.metadata
            },
            ..self
        }
    }
}

/// Preview of one milestone table, for diagnosing detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDetail {
    pub page: usize,
    pub index: usize,
    pub content_preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugReport {
    pub total_tables: usize,
    pub milestone_tables: usize,
    pub table_details: Vec<TableDetail>,
}
