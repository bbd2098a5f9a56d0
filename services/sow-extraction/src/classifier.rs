//! Milestone Relevance Classifier
//!
//! Keyword scoring over content blocks and over raw page text.

use sow_models::ContentBlock;
use tracing::{info, warn};

use crate::pdf_processor::PdfDocument;

/// Vocabulary for the block pass.
pub const MILESTONE_TABLE_KEYWORDS: [&str; 8] = [
    "milestone",
    "phase",
    "payment",
    "due date",
    "amount",
    "percentage",
    "description",
    "duration",
];

/// Broader vocabulary for the page-text pass.
pub const MILESTONE_TEXT_KEYWORDS: [&str; 10] = [
    "milestone",
    "phase",
    "task",
    "deliverable",
    "schedule",
    "timeline",
    "completion",
    "due",
    "deadline",
    "payment",
];

pub const DELIVERABLE_KEYWORDS: [&str; 2] = ["deliverables", "phase"];

/// Number of distinct vocabulary entries occurring in `text`, case-insensitively.
pub fn keyword_hits(text: &str, vocabulary: &[&str]) -> usize {
    let lower = text.to_lowercase();
    vocabulary.iter().filter(|keyword| lower.contains(*keyword)).count()
}

/// Blocks scoring at least `threshold` hits against the table vocabulary.
pub fn identify_milestone_blocks(blocks: &[ContentBlock], threshold: usize) -> Vec<&ContentBlock> {
    blocks
        .iter()
        .filter(|block| keyword_hits(&block.text_representation, &MILESTONE_TABLE_KEYWORDS) >= threshold)
        .collect()
}

/// Concatenate the text of every page mentioning milestone vocabulary, each
/// labelled with its 1-based page number.
pub fn extract_milestone_text(document: &PdfDocument) -> String {
    let mut milestone_text = String::new();

    for (page_num, page) in document.pages.iter().enumerate() {
        match page.extract_text(true) {
            Ok(text) => {
                if keyword_hits(&text, &MILESTONE_TEXT_KEYWORDS) > 0 {
                    milestone_text.push_str(&format!("=== Page {} ===\n{}\n\n", page_num + 1, text));
                    info!(page = page_num + 1, "Found milestone content on page");
                }
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Error extracting text from page");
                match page.extract_text(false) {
                    Ok(raw) if keyword_hits(&raw, &MILESTONE_TEXT_KEYWORDS) > 0 => {
                        milestone_text
                            .push_str(&format!("=== Page {} (Raw) ===\n{}\n\n", page_num + 1, raw));
                    }
                    Ok(_) => {}
                    Err(_) => warn!(page = page_num, "Alternative text extraction also failed"),
                }
            }
        }
    }

    info!(chars = milestone_text.len(), "Extracted milestone text");
    milestone_text
}

/// Concatenate the text of pages that mention deliverables or phases.
pub fn extract_deliverables_text(document: &PdfDocument) -> String {
    let mut deliverables_text = String::new();

    for (page_num, page) in document.pages.iter().enumerate() {
        match page.extract_text(true) {
            Ok(text) if keyword_hits(&text, &DELIVERABLE_KEYWORDS) > 0 => {
                deliverables_text.push_str(&text);
                deliverables_text.push('\n');
            }
            Ok(_) => {}
            Err(e) => warn!(page = page_num, error = %e, "Skipping page in deliverable scan"),
        }
    }

    deliverables_text
}
