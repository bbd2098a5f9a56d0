//! Prometheus counters for the extraction service.

use prometheus::{IntCounter, Registry, TextEncoder};
use sow_utils::{SowError, SowResult};

#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    pub documents_processed: IntCounter,
    pub document_failures: IntCounter,
    pub milestones_extracted: IntCounter,
    pub deliverables_extracted: IntCounter,
    pub completion_failures: IntCounter,
    pub milestones_synced: IntCounter,
}

impl ServiceMetrics {
    pub fn new() -> SowResult<Self> {
        let registry = Registry::new_custom(Some("sow".to_string()), None).map_err(metrics_error)?;

        let counter = |name: &str, help: &str| -> SowResult<IntCounter> {
            let counter = IntCounter::new(name, help).map_err(metrics_error)?;
            registry.register(Box::new(counter.clone())).map_err(metrics_error)?;
            Ok(counter)
        };

        Ok(Self {
            documents_processed: counter("documents_processed_total", "Documents extracted successfully")?,
            document_failures: counter("document_failures_total", "Documents that failed to extract")?,
            milestones_extracted: counter("milestones_extracted_total", "Milestones returned to callers")?,
            deliverables_extracted: counter("deliverables_extracted_total", "Deliverables returned to callers")?,
            completion_failures: counter("completion_failures_total", "Completion calls that failed and were skipped")?,
            milestones_synced: counter("milestones_synced_total", "Milestones accepted by the tracker")?,
            registry,
        })
    }

    pub fn render(&self) -> String {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .unwrap_or_else(|_| "Error encoding metrics".to_string())
    }
}

fn metrics_error(error: prometheus::Error) -> SowError {
    SowError::internal(format!("metrics registry: {}", error))
}
