//! SOW Pipeline
//!
//! Runs one document through segmentation, classification, extraction and
//! assembly, producing the result envelope.

use futures::stream::{self, StreamExt};
use sow_models::{
    dedup_milestones, ContentBlock, DebugReport, Deliverable, ExtractionResult, Milestone,
    ProcessingMetadata, TableDetail, EXTRACTION_METHOD,
};
use sow_utils::{AppConfig, ExtractionConfig, SowError, SowResult};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classifier::{extract_deliverables_text, extract_milestone_text, identify_milestone_blocks};
use crate::completion_client::{CompletionService, OpenAiClient};
use crate::extraction::{BlockSource, MilestoneExtractor};
use crate::markdown::write_audit_markdown;
use crate::metrics::ServiceMetrics;
use crate::pdf_processor::{DocumentReader, PdfDocument, PdfExtractReader};
use crate::segmenter::segment_document;

const PREVIEW_CHARS: usize = 200;

pub struct SowPipeline {
    reader: Arc<dyn DocumentReader>,
    extractor: MilestoneExtractor,
    settings: ExtractionConfig,
    metrics: Option<ServiceMetrics>,
}

impl SowPipeline {
    pub fn new(
        reader: Arc<dyn DocumentReader>,
        extractor: MilestoneExtractor,
        settings: ExtractionConfig,
    ) -> Self {
        Self {
            reader,
            extractor,
            settings,
            metrics: None,
        }
    }

    /// Pipeline over `pdf-extract` and the configured completion endpoint.
    pub fn from_config(config: &AppConfig) -> SowResult<Self> {
        let completion: Arc<dyn CompletionService> = Arc::new(OpenAiClient::new(&config.openai)?);
        let extractor =
            MilestoneExtractor::new(completion, config.openai.model.clone(), config.openai.temperature);
        Ok(Self::new(
            Arc::new(PdfExtractReader::new()),
            extractor,
            config.extraction.clone(),
        ))
    }

    pub fn with_metrics(mut self, metrics: ServiceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Extract milestones and deliverables from the PDF at `path`.
    ///
    /// Fails only when the file is missing or cannot be opened. Everything
    /// after that degrades to partial or empty results.
    pub async fn process_sow_document(&self, path: &Path) -> SowResult<ExtractionResult> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sow_run", %run_id, file = %path.display());
        self.run(path).instrument(span).await
    }

    /// Report which blocks were detected and which scored as milestone tables.
    pub async fn debug_report(&self, path: &Path) -> SowResult<DebugReport> {
        let document = self.open(path).await?;
        let blocks = segment_document(&document);
        let milestone_blocks = identify_milestone_blocks(&blocks, self.settings.block_keyword_threshold);

        Ok(DebugReport {
            total_tables: blocks.len(),
            milestone_tables: milestone_blocks.len(),
            table_details: milestone_blocks
                .iter()
                .map(|block| TableDetail {
                    page: block.page,
                    index: block.block_index,
                    content_preview: preview(&block.text_representation),
                })
                .collect(),
        })
    }

    async fn open(&self, path: &Path) -> SowResult<PdfDocument> {
        if !path.exists() {
            return Err(SowError::not_found(format!("PDF file not found: {}", path.display())));
        }

        let reader = Arc::clone(&self.reader);
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || reader.open(&owned))
            .await
            .map_err(|e| SowError::internal(format!("Document reader task failed: {}", e)))?
    }

    async fn run(&self, path: &Path) -> SowResult<ExtractionResult> {
        let started = Instant::now();
        info!("Starting SOW processing");

        let document = self.open(path).await?;
        info!(pages = document.page_count(), "Document opened");
        let blocks = segment_document(&document);

        let markdown_saved = self.settings.markdown_enabled
            && write_audit_markdown(&document, &file_stem(path), Path::new(&self.settings.markdown_dir)).await;

        let milestone_blocks = identify_milestone_blocks(&blocks, self.settings.block_keyword_threshold);
        info!(count = milestone_blocks.len(), "Identified milestone tables");

        let milestone_text = extract_milestone_text(&document);
        let deliverables_text = extract_deliverables_text(&document);

        let (milestones, deliverables) = futures::join!(
            self.collect_milestones(&milestone_blocks, &milestone_text),
            self.collect_deliverables(&deliverables_text),
        );

        let elapsed = started.elapsed().as_secs_f64();
        info!(
            milestones = milestones.len(),
            deliverables = deliverables.len(),
            seconds = elapsed,
            "SOW processing completed"
        );

        Ok(ExtractionResult {
            metadata: ProcessingMetadata {
                processing_confidence: self.settings.processing_confidence,
                tables_found: blocks.len(),
                milestone_tables_identified: milestone_blocks.len(),
                markdown_saved,
                processing_time: Some((elapsed * 100.0).round() / 100.0),
                milestones_extracted: Some(milestones.len()),
                deliverables_extracted: Some(deliverables.len()),
                extraction_method: Some(EXTRACTION_METHOD.to_string()),
                sync_status: None,
            },
            milestones,
            deliverables,
        })
    }

    /// Block pass, then the text-pool pass when the block pass came up short.
    async fn collect_milestones(&self, blocks: &[&ContentBlock], milestone_text: &str) -> Vec<Milestone> {
        let calls: Vec<_> = blocks
            .iter()
            .map(|block| {
                let source = BlockSource {
                    page: block.page,
                    block_index: block.block_index,
                };
                self.extractor
                    .extract_milestones(&block.text_representation, Some(source))
            })
            .collect();

        let outcomes: Vec<_> = stream::iter(calls)
            .buffered(self.settings.max_concurrent_completions.max(1))
            .collect()
            .await;

        let mut milestones = Vec::new();
        for (block, outcome) in blocks.iter().zip(outcomes) {
            match outcome {
                Ok(found) => {
                    info!(page = block.page, block = block.block_index, count = found.len(), "Block milestones extracted");
                    milestones.extend(found);
                }
                Err(e) => {
                    error!(page = block.page, block = block.block_index, error = %e, "Failed to extract milestones from block");
                    self.record_completion_failure();
                }
            }
        }

        if milestone_text.trim().is_empty() {
            info!("No milestone text found for text-pool pass");
        } else if milestones.len() < self.settings.text_pool_threshold {
            info!(found = milestones.len(), "Few milestones from blocks, trying text extraction");
            match self.extractor.extract_milestones(milestone_text, None).await {
                Ok(found) => milestones.extend(found),
                Err(e) => {
                    error!(error = %e, "Failed to extract milestones from text");
                    self.record_completion_failure();
                }
            }
        }

        dedup_milestones(milestones)
    }

    async fn collect_deliverables(&self, deliverables_text: &str) -> Vec<Deliverable> {
        match self.extractor.extract_deliverables(deliverables_text).await {
            Ok(deliverables) => deliverables,
            Err(e) => {
                warn!(error = %e, "Failed to extract deliverables");
                self.record_completion_failure();
                Vec::new()
            }
        }
    }

    fn record_completion_failure(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.completion_failures.inc();
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("document")
        .to_string()
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{grid, schedule_pdf, ScriptedCompletion, StubPage, StubReader};
    use sow_models::{SourceRef, BLOCK_CONFIDENCE, TEXT_POOL_CONFIDENCE};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const KICKOFF: &str = r#"[{"name":"Kickoff","description":"Kickoff","due_date":"2024-01-15","payment_amount":"$5000"}]"#;

    struct Fixture {
        _dir: TempDir,
        path: PathBuf,
        completion: Arc<ScriptedCompletion>,
        pipeline: SowPipeline,
    }

    fn settings() -> ExtractionConfig {
        ExtractionConfig {
            markdown_enabled: false,
            ..ExtractionConfig::default()
        }
    }

    fn fixture_with(reader: StubReader, completion: ScriptedCompletion, settings: ExtractionConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acme_sow.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let completion = Arc::new(completion);
        let extractor = MilestoneExtractor::new(completion.clone(), "test-model", 0.0);
        let pipeline = SowPipeline::new(Arc::new(reader), extractor, settings);

        Fixture {
            _dir: dir,
            path,
            completion,
            pipeline,
        }
    }

    fn fixture(pages: Vec<StubPage>, completion: ScriptedCompletion) -> Fixture {
        fixture_with(StubReader::new(pages), completion, settings())
    }

    fn schedule_table(label: &str) -> sow_models::TableGrid {
        grid(&[&["Phase", "Due Date", "Amount"], &[label, "2024-01-15", "$5000"]])
    }

    fn milestones_json(names: &[&str]) -> String {
        let items: Vec<serde_json::Value> = names
            .iter()
            .map(|name| serde_json::json!({"name": name, "description": "", "due_date": null, "payment_amount": null}))
            .collect();
        serde_json::Value::Array(items).to_string()
    }

    #[tokio::test]
    async fn test_single_schedule_table() {
        let f = fixture(
            vec![
                StubPage::text("").with_table(schedule_table("Kickoff")),
                StubPage::text("Signatures"),
            ],
            ScriptedCompletion::new(KICKOFF),
        );

        let result = f.pipeline.process_sow_document(&f.path).await.unwrap();

        assert_eq!(result.milestones.len(), 1);
        let kickoff = &result.milestones[0];
        assert_eq!(kickoff.name, "Kickoff");
        assert_eq!(kickoff.due_date.as_deref(), Some("2024-01-15"));
        assert_eq!(kickoff.payment_amount.as_deref(), Some("$5000"));
        assert_eq!(kickoff.provenance.confidence, BLOCK_CONFIDENCE);
        assert_eq!(kickoff.provenance.page, SourceRef::Index(0));
        assert!(result.deliverables.is_empty());
        assert_eq!(result.metadata.tables_found, 1);
        assert_eq!(result.metadata.milestone_tables_identified, 1);
    }

    #[tokio::test]
    async fn test_duplicate_across_blocks_keeps_first() {
        let first = r#"[{"name":"Kickoff","description":"from first block","due_date":"2024-01-15"}]"#;
        let second = r#"[{"name":"Kickoff","description":"from second block","due_date":"2024-01-15"}]"#;
        let f = fixture(
            vec![
                StubPage::text("").with_table(schedule_table("Block A")),
                StubPage::text("").with_table(schedule_table("Block B")),
            ],
            ScriptedCompletion::new("[]")
                .respond("Block A", first)
                .respond("Block B", second),
        );

        let result = f.pipeline.process_sow_document(&f.path).await.unwrap();

        assert_eq!(result.milestones.len(), 1);
        assert_eq!(result.milestones[0].description, "from first block");
        assert_eq!(result.milestones[0].provenance.page, SourceRef::Index(0));
    }

    #[tokio::test]
    async fn test_enough_block_milestones_skip_text_pool() {
        let five = milestones_json(&["M1", "M2", "M3", "M4", "M5"]);
        let f = fixture(
            vec![StubPage::text("Project milestone schedule").with_table(schedule_table("Kickoff"))],
            ScriptedCompletion::new("[]").respond("Kickoff", &five),
        );

        let result = f.pipeline.process_sow_document(&f.path).await.unwrap();

        assert_eq!(result.milestones.len(), 5);
        assert_eq!(f.completion.calls_containing("=== Page"), 0);
    }

    #[tokio::test]
    async fn test_few_block_milestones_trigger_one_text_pool_call() {
        let four = milestones_json(&["M1", "M2", "M3", "M4"]);
        let f = fixture(
            vec![StubPage::text("Project milestone schedule").with_table(schedule_table("Kickoff"))],
            ScriptedCompletion::new("[]")
                .respond("=== Page", &milestones_json(&["M4", "Launch"]))
                .respond("Kickoff", &four),
        );

        let result = f.pipeline.process_sow_document(&f.path).await.unwrap();

        assert_eq!(f.completion.calls_containing("=== Page"), 1);
        let names: Vec<&str> = result.milestones.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["M1", "M2", "M3", "M4", "Launch"]);
        assert_eq!(result.milestones[3].provenance.confidence, BLOCK_CONFIDENCE);
        assert_eq!(result.milestones[4].provenance.confidence, TEXT_POOL_CONFIDENCE);
        assert!(result.milestones[4].provenance.is_text_pool());
    }

    #[tokio::test]
    async fn test_text_pool_threshold_is_configurable() {
        let f = fixture_with(
            StubReader::new(vec![
                StubPage::text("Project milestone schedule").with_table(schedule_table("Kickoff"))
            ]),
            ScriptedCompletion::new(KICKOFF),
            ExtractionConfig {
                text_pool_threshold: 1,
                ..settings()
            },
        );

        f.pipeline.process_sow_document(&f.path).await.unwrap();

        assert_eq!(f.completion.calls_containing("=== Page"), 0);
    }

    #[tokio::test]
    async fn test_document_without_candidates_yields_empty_result() {
        let f = fixture(
            vec![StubPage::text("Terms and conditions apply."), StubPage::text("Signatures")],
            ScriptedCompletion::new(KICKOFF),
        );

        let result = f.pipeline.process_sow_document(&f.path).await.unwrap();

        assert!(result.milestones.is_empty());
        assert!(result.deliverables.is_empty());
        assert_eq!(result.metadata.tables_found, 0);
        assert!(f.completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_completion_does_not_fail_run() {
        let f = fixture(
            vec![StubPage::text("Phase one deliverables").with_table(schedule_table("Kickoff"))],
            ScriptedCompletion::new("not json"),
        );

        let result = f.pipeline.process_sow_document(&f.path).await.unwrap();

        assert!(result.milestones.is_empty());
        assert!(result.deliverables.is_empty());
    }

    #[tokio::test]
    async fn test_block_service_failure_keeps_other_blocks() {
        let metrics = ServiceMetrics::new().unwrap();
        let f = fixture(
            vec![
                StubPage::text("").with_table(schedule_table("Block A")),
                StubPage::text("").with_table(schedule_table("Block B")),
            ],
            ScriptedCompletion::new("[]").fail("Block A").respond("Block B", KICKOFF),
        );
        let pipeline = f.pipeline.with_metrics(metrics.clone());

        let result = pipeline.process_sow_document(&f.path).await.unwrap();

        assert_eq!(result.milestones.len(), 1);
        assert_eq!(result.milestones[0].provenance.page, SourceRef::Index(1));
        assert_eq!(metrics.completion_failures.get(), 1);
    }

    #[tokio::test]
    async fn test_deliverables_extracted_concurrently_with_milestones() {
        let deliverables = r#"[{"name":"Design document","description":"","delivery_date":"2024-03-01","related_milestone":"Phase 1"}]"#;
        let f = fixture(
            vec![StubPage::text("Deliverables: design document")],
            ScriptedCompletion::new("[]").respond("deliverable name", deliverables),
        );

        let result = f.pipeline.process_sow_document(&f.path).await.unwrap();

        assert_eq!(result.deliverables.len(), 1);
        assert_eq!(result.deliverables[0].name, "Design document");
        assert_eq!(f.completion.calls_containing("deliverable name"), 1);
        assert_eq!(result.metadata.deliverables_extracted, Some(1));
    }

    #[tokio::test]
    async fn test_deliverable_failure_yields_empty_list() {
        let f = fixture(
            vec![StubPage::text("Deliverables: design document")],
            ScriptedCompletion::new("[]").fail("deliverable name"),
        );

        let result = f.pipeline.process_sow_document(&f.path).await.unwrap();

        assert!(result.deliverables.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_is_filled() {
        let f = fixture(
            vec![StubPage::text("").with_table(schedule_table("Kickoff"))],
            ScriptedCompletion::new(KICKOFF),
        );

        let metadata = f.pipeline.process_sow_document(&f.path).await.unwrap().metadata;

        assert_eq!(metadata.processing_confidence, 0.95);
        assert_eq!(metadata.extraction_method.as_deref(), Some(EXTRACTION_METHOD));
        assert_eq!(metadata.milestones_extracted, Some(1));
        assert!(metadata.processing_time.is_some());
        assert!(!metadata.markdown_saved);
        assert!(metadata.sync_status.is_none());
    }

    #[tokio::test]
    async fn test_markdown_saved_under_document_stem() {
        let out = tempfile::tempdir().unwrap();
        let f = fixture_with(
            StubReader::new(vec![StubPage::text("Scope")]),
            ScriptedCompletion::new("[]"),
            ExtractionConfig {
                markdown_enabled: true,
                markdown_dir: out.path().to_string_lossy().into_owned(),
                ..ExtractionConfig::default()
            },
        );

        let result = f.pipeline.process_sow_document(&f.path).await.unwrap();

        assert!(result.metadata.markdown_saved);
        assert!(out.path().join("acme_sow.md").exists());
    }

    #[tokio::test]
    async fn test_open_failure_propagates() {
        let f = fixture_with(StubReader::failing(), ScriptedCompletion::new("[]"), settings());

        let err = f.pipeline.process_sow_document(&f.path).await.unwrap_err();

        assert_eq!(err.error_code(), "DOCUMENT_OPEN_ERROR");
        assert!(f.completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let f = fixture(vec![], ScriptedCompletion::new("[]"));

        let err = f
            .pipeline
            .process_sow_document(Path::new("/nonexistent/missing.pdf"))
            .await
            .unwrap_err();

        assert_eq!(err.http_status_code(), 404);
    }

    #[tokio::test]
    async fn test_block_completions_respect_concurrency_limit() {
        let pages = (0..10)
            .map(|i| StubPage::text("").with_table(schedule_table(&format!("Phase {}", i))))
            .collect();
        let f = fixture_with(
            StubReader::new(pages),
            ScriptedCompletion::new("[]"),
            ExtractionConfig {
                max_concurrent_completions: 3,
                ..settings()
            },
        );

        f.pipeline.process_sow_document(&f.path).await.unwrap();

        assert_eq!(f.completion.prompts().len(), 10);
        assert!(f.completion.peak_in_flight() <= 3);
        assert!(f.completion.peak_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_real_pdf_schedule_reaches_the_extractor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.pdf");
        std::fs::write(
            &path,
            schedule_pdf(&[
                ["Phase", "Due Date", "Amount"],
                ["Kickoff", "2024-01-15", "$5000"],
                ["Design", "2024-02-15", "$7500"],
            ]),
        )
        .unwrap();
        let completion = Arc::new(ScriptedCompletion::new(KICKOFF));
        let extractor = MilestoneExtractor::new(completion.clone(), "test-model", 0.0);
        let pipeline = SowPipeline::new(Arc::new(PdfExtractReader::new()), extractor, settings());

        let result = pipeline.process_sow_document(&path).await.unwrap();

        assert_eq!(result.metadata.tables_found, 1);
        assert_eq!(result.metadata.milestone_tables_identified, 1);
        assert_eq!(completion.calls_containing("Kickoff | 2024-01-15 | $5000"), 1);
        assert_eq!(result.milestones.len(), 1);
    }

    #[tokio::test]
    async fn test_debug_report_lists_milestone_tables() {
        let long_row = "x".repeat(300);
        let f = fixture(
            vec![
                StubPage::text("")
                    .with_table(grid(&[&["Name", "Role"], &["Alice", "PM"]]))
                    .with_table(grid(&[&["Milestone", "Payment", "Due Date"], &[&long_row, "$1", "Q1"]])),
            ],
            ScriptedCompletion::new("[]"),
        );

        let report = f.pipeline.debug_report(&f.path).await.unwrap();

        assert_eq!(report.total_tables, 2);
        assert_eq!(report.milestone_tables, 1);
        let detail = &report.table_details[0];
        assert_eq!((detail.page, detail.index), (0, 1));
        assert_eq!(detail.content_preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(detail.content_preview.ends_with("..."));
        assert!(f.completion.prompts().is_empty());
    }

    #[test]
    fn test_preview_keeps_short_text() {
        assert_eq!(preview("Phase | Amount"), "Phase | Amount");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(Path::new("/tmp/uploads/acme_sow.pdf")), "acme_sow");
    }
}
