//! Markdown transcript of a document, written as an audit artifact.

use sow_models::TableGrid;
use sow_utils::SowResult;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::pdf_processor::PdfDocument;

const HEADING_MAX_CHARS: usize = 100;

pub fn render_markdown(document: &PdfDocument, stem: &str) -> String {
    let mut lines: Vec<String> = vec![format!("# SOW Document - {}", stem), String::new()];

    for (page_num, page) in document.pages.iter().enumerate() {
        lines.push(format!("## Page {}", page_num + 1));
        lines.push(String::new());

        match page.extract_text(true) {
            Ok(text) => {
                for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    if is_heading_line(line) {
                        lines.push(format!("### {}", line));
                    } else {
                        lines.push(line.to_string());
                    }
                    lines.push(String::new());
                }
            }
            Err(e) => warn!(page = page_num, error = %e, "Markdown: page text unavailable"),
        }

        match page.extract_tables() {
            Ok(tables) => {
                for (table_idx, table) in tables.iter().enumerate().filter(|(_, t)| t.len() > 1) {
                    lines.push(format!("#### Table {}", table_idx + 1));
                    lines.push(String::new());
                    lines.extend(render_table(table));
                    lines.push(String::new());
                }
            }
            Err(e) => warn!(page = page_num, error = %e, "Markdown: page tables unavailable"),
        }

        lines.push("---".to_string());
        lines.push(String::new());
    }

    lines.join("\n")
}

/// All-caps lines under 100 characters read as section headings.
fn is_heading_line(line: &str) -> bool {
    line.chars().count() < HEADING_MAX_CHARS
        && line.chars().any(char::is_uppercase)
        && !line.chars().any(char::is_lowercase)
}

fn render_row(row: &[Option<String>]) -> String {
    let cells: Vec<&str> = row.iter().map(|c| c.as_deref().unwrap_or("")).collect();
    format!("| {} |", cells.join(" | "))
}

fn render_table(table: &TableGrid) -> Vec<String> {
    let Some((header, rows)) = table.split_first() else {
        return Vec::new();
    };

    let mut out = vec![
        render_row(header),
        format!("|{}|", vec!["---"; header.len()].join("|")),
    ];
    out.extend(
        rows.iter()
            .filter(|row| row.iter().any(|cell| cell.as_deref().map_or(false, |c| !c.is_empty())))
            .map(|row| render_row(row)),
    );
    out
}

pub async fn save_markdown(dir: &Path, stem: &str, content: &str) -> SowResult<PathBuf> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.md", stem));
    fs::write(&path, content).await?;
    Ok(path)
}

/// Render and save the transcript. Failures are logged, never returned.
pub async fn write_audit_markdown(document: &PdfDocument, stem: &str, dir: &Path) -> bool {
    let content = render_markdown(document, stem);
    match save_markdown(dir, stem, &content).await {
        Ok(path) => {
            info!(path = %path.display(), "Markdown saved");
            true
        }
        Err(e) => {
            warn!(error = %e, "Failed to save markdown");
            false
        }
    }
}
