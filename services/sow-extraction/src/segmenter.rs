//! Table & Text Segmenter
//!
//! Walks the pages of a document and produces the content blocks that may
//! hold milestone material.

use sow_models::ContentBlock;
use sow_utils::SowResult;
use tracing::{debug, error, info, warn};

use crate::pdf_processor::{PdfDocument, PdfPage};

/// Words that mark a text line as a likely table row.
pub const TABLE_INDICATORS: [&str; 9] = [
    "milestone",
    "phase",
    "payment",
    "deliverable",
    "amount",
    "date",
    "percentage",
    "$",
    "%",
];

/// Segment every page, preserving page order and within-page block order.
pub fn segment_document(document: &PdfDocument) -> Vec<ContentBlock> {
    let blocks: Vec<ContentBlock> = document
        .pages
        .iter()
        .enumerate()
        .flat_map(|(page_num, page)| segment_page(page_num, page.as_ref()))
        .collect();

    info!(blocks = blocks.len(), "Total tables/text blocks extracted");
    blocks
}

/// Segment one page. Never fails: a page that cannot be read structurally is
/// retried as plain text, and skipped if that fails too.
pub fn segment_page(page_num: usize, page: &dyn PdfPage) -> Vec<ContentBlock> {
    match scan_page(page_num, page) {
        Ok(blocks) => blocks,
        Err(e) => {
            warn!(page = page_num, error = %e, "Error processing page, retrying as plain text");
            match page.extract_text(false) {
                Ok(text) if !text.trim().is_empty() => vec![ContentBlock::fallback_text(page_num, text)],
                Ok(_) => Vec::new(),
                Err(text_error) => {
                    error!(page = page_num, error = %text_error, "Failed to extract even text from page");
                    Vec::new()
                }
            }
        }
    }
}

fn scan_page(page_num: usize, page: &dyn PdfPage) -> SowResult<Vec<ContentBlock>> {
    let tables = page.extract_tables()?;
    debug!(page = page_num, tables = tables.len(), "Tables found on page");

    if tables.is_empty() {
        let text = page.extract_text(true)?;
        if looks_like_table_text(&text) {
            info!(page = page_num, "Found table-like text patterns");
            return Ok(vec![ContentBlock::text_pattern(page_num, text)]);
        }
        return Ok(Vec::new());
    }

    // Header-only or empty grids carry nothing to extract.
    Ok(tables
        .into_iter()
        .enumerate()
        .filter(|(_, grid)| grid.len() >= 2)
        .map(|(index, grid)| ContentBlock::table(page_num, index, grid))
        .collect())
}

/// True when at least two lines have three or more words and mention a
/// table indicator.
pub fn looks_like_table_text(text: &str) -> bool {
    text.lines()
        .map(|line| line.trim().to_lowercase())
        .filter(|line| {
            line.split_whitespace().count() >= 3
                && TABLE_INDICATORS.iter().any(|indicator| line.contains(indicator))
        })
        .count()
        >= 2
}
