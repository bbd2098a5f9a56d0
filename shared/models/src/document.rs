//! Content blocks detected inside a SOW document.

use serde::{Deserialize, Serialize};

/// A table as returned by a document reader: rows of optional cell strings.
pub type TableGrid = Vec<Vec<Option<String>>>;

/// How a content block was detected on its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// A structured table returned by the reader.
    Table,
    /// Page text whose lines look like table rows.
    TextPattern,
    /// Plain text recovered after the page failed structured extraction.
    FallbackText,
}

/// One unit of candidate milestone material, scoped to a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub page: usize,
    pub block_index: usize,
    pub kind: BlockKind,
    /// Only populated for `BlockKind::Table`.
    pub raw_grid: TableGrid,
    pub text_representation: String,
}

impl ContentBlock {
    pub fn table(page: usize, block_index: usize, grid: TableGrid) -> Self {
        let text_representation = table_to_text(&grid);
        Self {
            page,
            block_index,
            kind: BlockKind::Table,
            raw_grid: grid,
            text_representation,
        }
    }

    pub fn text_pattern(page: usize, text: impl Into<String>) -> Self {
        Self {
            page,
            block_index: 0,
            kind: BlockKind::TextPattern,
            raw_grid: Vec::new(),
            text_representation: text.into(),
        }
    }

    pub fn fallback_text(page: usize, text: impl Into<String>) -> Self {
        Self {
            page,
            block_index: 0,
            kind: BlockKind::FallbackText,
            raw_grid: Vec::new(),
            text_representation: text.into(),
        }
    }
}

/// Flatten a grid into pipe-delimited lines, one per non-empty row.
///
/// Cells are trimmed and missing cells become empty strings.
pub fn table_to_text(grid: &TableGrid) -> String {
    grid.iter()
        .filter(|row| !row.is_empty())
        .map(|row| {
            row.iter()
                .map(|cell| cell.as_deref().map(str::trim).unwrap_or(""))
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
