//! Milestone and deliverable records extracted from SOW documents.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::{Validate, ValidationError};

/// Confidence attached to milestones recovered from a relevant content block.
pub const BLOCK_CONFIDENCE: f64 = 1.0;
/// Confidence attached to milestones recovered from the page-text pool.
pub const TEXT_POOL_CONFIDENCE: f64 = 0.8;

pub const TEXT_POOL_PAGE_MARKER: &str = "text_content";
pub const TEXT_POOL_BLOCK_MARKER: &str = "text";

/// A page or block reference: an index, or a literal marker for text-pool origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceRef {
    Index(usize),
    Marker(String),
}

/// Where an extracted milestone came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub page: SourceRef,
    pub table_index: SourceRef,
    pub confidence: f64,
}

impl Provenance {
    pub fn block(page: usize, block_index: usize) -> Self {
        Self {
            page: SourceRef::Index(page),
            table_index: SourceRef::Index(block_index),
            confidence: BLOCK_CONFIDENCE,
        }
    }

    pub fn text_pool() -> Self {
        Self {
            page: SourceRef::Marker(TEXT_POOL_PAGE_MARKER.to_string()),
            table_index: SourceRef::Marker(TEXT_POOL_BLOCK_MARKER.to_string()),
            confidence: TEXT_POOL_CONFIDENCE,
        }
    }

    pub fn is_text_pool(&self) -> bool {
        matches!(&self.page, SourceRef::Marker(m) if m == TEXT_POOL_PAGE_MARKER)
    }
}

/// A milestone with its payment terms.
///
/// Dates and amounts are kept exactly as the document phrased them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Milestone {
    #[validate(custom = "validate_not_blank")]
    pub name: String,
    pub description: String,
    pub due_date: Option<String>,
    pub payment_amount: Option<String>,
    #[serde(rename = "source_table")]
    pub provenance: Provenance,
}

impl Milestone {
    /// Composite identity used for deduplication. No normalisation is applied.
    pub fn dedup_key(&self) -> (&str, Option<&str>) {
        (self.name.as_str(), self.due_date.as_deref())
    }
}

/// A deliverable. `related_milestone` is a free-text label, not a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Deliverable {
    #[validate(custom = "validate_not_blank")]
    pub name: String,
    pub description: String,
    pub delivery_date: Option<String>,
    pub related_milestone: Option<String>,
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// Drop milestones whose (name, due_date) was already seen, keeping the
/// first occurrence and the original order.
pub fn dedup_milestones(milestones: Vec<Milestone>) -> Vec<Milestone> {
    let mut seen: HashSet<(String, Option<String>)> = HashSet::new();
    milestones
        .into_iter()
        .filter(|m| seen.insert((m.name.clone(), m.due_date.clone())))
        .collect()
}
