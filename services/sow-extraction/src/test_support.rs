//! Stubs for the reader and completion boundaries.

use async_trait::async_trait;
use sow_models::TableGrid;
use sow_utils::{SowError, SowResult};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::completion_client::CompletionService;
use crate::pdf_processor::{DocumentReader, PdfDocument, PdfPage};

pub fn grid(rows: &[&[&str]]) -> TableGrid {
    rows.iter()
        .map(|row| row.iter().map(|cell| Some(cell.to_string())).collect())
        .collect()
}

/// A one-page PDF laying `rows` out as a three-column Helvetica table,
/// columns starting at x = 72, 250 and 430 and rows 20pt apart.
pub fn schedule_pdf(rows: &[[&str; 3]]) -> Vec<u8> {
    let mut content = String::new();
    for (row, cells) in rows.iter().enumerate() {
        let y = 700 - 20 * row;
        for (x, cell) in [72, 250, 430].iter().zip(cells.iter()) {
            content.push_str(&format!("BT /F1 12 Tf {} {} Td ({}) Tj ET\n", x, y, cell));
        }
    }

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
            .to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        format!("<< /Length {} >>\nstream\n{}endstream", content.len(), content),
    ];

    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::new();
    for (index, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.push_str(&format!("{} 0 obj\n{}\nendobj\n", index + 1, body));
    }

    let xref = pdf.len();
    pdf.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for offset in offsets {
        pdf.push_str(&format!("{:010} 00000 n \n", offset));
    }
    pdf.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref
    ));
    pdf.into_bytes()
}

/// In-memory page. `None` in a field makes the matching call fail.
#[derive(Clone)]
pub struct StubPage {
    pub text: Option<String>,
    pub plain_text: Option<String>,
    pub tables: Option<Vec<TableGrid>>,
}

impl StubPage {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            plain_text: Some(text.to_string()),
            tables: Some(Vec::new()),
        }
    }

    pub fn with_table(mut self, table: TableGrid) -> Self {
        self.tables.get_or_insert_with(Vec::new).push(table);
        self
    }

    pub fn tables_fail(mut self) -> Self {
        self.tables = None;
        self
    }

    pub fn layout_text_fails(mut self) -> Self {
        self.text = None;
        self
    }

    pub fn all_fail(self) -> Self {
        Self {
            text: None,
            plain_text: None,
            tables: None,
        }
    }
}

impl PdfPage for StubPage {
    fn extract_text(&self, layout_aware: bool) -> SowResult<String> {
        let text = if layout_aware { &self.text } else { &self.plain_text };
        text.clone()
            .ok_or_else(|| SowError::page_extraction(0, "stub text failure"))
    }

    fn extract_tables(&self) -> SowResult<Vec<TableGrid>> {
        self.tables
            .clone()
            .ok_or_else(|| SowError::page_extraction(0, "stub table failure"))
    }
}

pub struct StubReader {
    pages: Vec<StubPage>,
    fail_open: bool,
}

impl StubReader {
    pub fn new(pages: Vec<StubPage>) -> Self {
        Self { pages, fail_open: false }
    }

    pub fn failing() -> Self {
        Self { pages: Vec::new(), fail_open: true }
    }

    pub fn document(&self) -> PdfDocument {
        PdfDocument::new(
            self.pages
                .iter()
                .cloned()
                .map(|page| Box::new(page) as Box<dyn PdfPage>)
                .collect(),
        )
    }
}

impl DocumentReader for StubReader {
    fn open(&self, path: &Path) -> SowResult<PdfDocument> {
        if self.fail_open {
            return Err(SowError::document_open(path.display().to_string(), "stub open failure"));
        }
        Ok(self.document())
    }
}

/// Completion stub answering by the first rule whose needle occurs in the prompt.
pub struct ScriptedCompletion {
    rules: Vec<(String, SowResult<String>)>,
    default: String,
    prompts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedCompletion {
    pub fn new(default: &str) -> Self {
        Self {
            rules: Vec::new(),
            default: default.to_string(),
            prompts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn respond(mut self, needle: &str, response: &str) -> Self {
        self.rules.push((needle.to_string(), Ok(response.to_string())));
        self
    }

    pub fn fail(mut self, needle: &str) -> Self {
        self.rules.push((
            needle.to_string(),
            Err(SowError::completion_service("stub transport failure")),
        ));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Most calls observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls_containing(&self, needle: &str) -> usize {
        self.prompts().iter().filter(|p| p.contains(needle)).count()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &str, _model: &str, _temperature: f32) -> SowResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| Ok(self.default.clone()))
    }
}
