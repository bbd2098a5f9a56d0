//! PDF Processor
//!
//! Page-oriented access to a PDF: per-page text, plus table grids inferred
//! from where each glyph sits on the page.

use pdf_extract::{output_doc_page, Document, MediaBox, OutputDev, OutputError, PlainTextOutput, Transform};
use sow_models::TableGrid;
use sow_utils::{SowError, SowResult};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{info, warn};

/// One page of an opened document. Each call may fail on its own without
/// affecting the other pages.
pub trait PdfPage: Send + Sync {
    /// Page text. With `layout_aware` false, spacing is collapsed and blank
    /// lines are dropped.
    fn extract_text(&self, layout_aware: bool) -> SowResult<String>;

    fn extract_tables(&self) -> SowResult<Vec<TableGrid>>;
}

/// An opened document: pages in reading order.
pub struct PdfDocument {
    pub pages: Vec<Box<dyn PdfPage>>,
}

impl PdfDocument {
    pub fn new(pages: Vec<Box<dyn PdfPage>>) -> Self {
        Self { pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

pub trait DocumentReader: Send + Sync {
    /// Fails with `SowError::DocumentOpen` when the file is not a readable PDF.
    fn open(&self, path: &Path) -> SowResult<PdfDocument>;
}

/// Reader backed by `pdf-extract`.
pub struct PdfExtractReader;

impl PdfExtractReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfExtractReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentReader for PdfExtractReader {
    fn open(&self, path: &Path) -> SowResult<PdfDocument> {
        let path_str = path.display().to_string();
        let data = std::fs::read(path).map_err(|e| SowError::document_open(&path_str, e.to_string()))?;

        let document = guard(|| load_document(&data)).map_err(|message| SowError::document_open(&path_str, message))?;
        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        if page_numbers.is_empty() {
            return Err(SowError::document_open(&path_str, "document has no pages"));
        }

        let pages: Vec<Box<dyn PdfPage>> = page_numbers
            .iter()
            .enumerate()
            .map(|(index, &number)| Box::new(read_page(&document, index, number)) as Box<dyn PdfPage>)
            .collect();

        info!(path = %path_str, pages = pages.len(), "PDF opened successfully");
        Ok(PdfDocument::new(pages))
    }
}

fn load_document(data: &[u8]) -> Result<Document, String> {
    let mut document = Document::load_mem(data).map_err(|e| e.to_string())?;
    if document.is_encrypted() {
        document
            .decrypt("")
            .map_err(|e| format!("encrypted document: {}", e))?;
    }
    Ok(document)
}

/// pdf-extract panics on some malformed inputs instead of returning an error.
fn guard<T>(f: impl FnOnce() -> Result<T, String>) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| Err("PDF parser panicked".to_string()))
}

/// Run both passes over one page. A failing pass only poisons that pass.
fn read_page(document: &Document, index: usize, number: u32) -> ExtractedPage {
    let text = guard(|| {
        let mut text = String::new();
        {
            let mut output = PlainTextOutput::new(&mut text);
            output_doc_page(document, &mut output, number).map_err(|e| e.to_string())?;
        }
        Ok(text)
    });

    let glyphs = guard(|| {
        let mut collector = GlyphCollector::default();
        output_doc_page(document, &mut collector, number).map_err(|e| e.to_string())?;
        Ok(collector.glyphs)
    });

    if let Err(message) = &glyphs {
        warn!(page = index, error = %message, "Glyph positions unavailable");
    }

    ExtractedPage {
        text: text.map_err(|message| SowError::page_extraction(index, message)),
        tables: glyphs
            .map(|glyphs| tables_from_glyphs(&glyphs))
            .map_err(|message| SowError::page_extraction(index, message)),
    }
}

/// A page read eagerly at open time.
pub struct ExtractedPage {
    text: SowResult<String>,
    tables: SowResult<Vec<TableGrid>>,
}

impl ExtractedPage {
    pub fn new(text: SowResult<String>, tables: SowResult<Vec<TableGrid>>) -> Self {
        Self { text, tables }
    }
}

impl PdfPage for ExtractedPage {
    fn extract_text(&self, layout_aware: bool) -> SowResult<String> {
        let text = self.text.clone()?;
        if layout_aware {
            Ok(text)
        } else {
            Ok(plain_text(&text))
        }
    }

    fn extract_tables(&self) -> SowResult<Vec<TableGrid>> {
        self.tables.clone()
    }
}

/// Collapse runs of whitespace within lines and drop blank lines.
pub fn plain_text(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A glyph in top-down page coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub x: f64,
    pub y: f64,
    pub end: f64,
    pub size: f64,
    pub text: String,
}

#[derive(Default)]
struct GlyphCollector {
    page_height: f64,
    glyphs: Vec<Glyph>,
}

impl OutputDev for GlyphCollector {
    fn begin_page(
        &mut self,
        _page_num: u32,
        media_box: &MediaBox,
        _art_box: Option<(f64, f64, f64, f64)>,
    ) -> Result<(), OutputError> {
        self.page_height = media_box.ury - media_box.lly;
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn output_character(
        &mut self,
        trm: &Transform,
        width: f64,
        _spacing: f64,
        font_size: f64,
        char: &str,
    ) -> Result<(), OutputError> {
        let scale = ((trm.m11 + trm.m21) * (trm.m12 + trm.m22)).abs().sqrt();
        let size = font_size * scale;
        self.glyphs.push(Glyph {
            x: trm.m31,
            y: self.page_height - trm.m32,
            end: trm.m31 + width * size,
            size,
            text: char.to_string(),
        });
        Ok(())
    }

    fn begin_word(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_word(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_line(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Glyphs whose baselines differ by at most this many ems share a line.
const LINE_TOLERANCE_EMS: f64 = 0.5;
/// A horizontal gap wider than this separates words.
const WORD_GAP_EMS: f64 = 0.1;
/// A horizontal gap wider than this separates table columns.
const COLUMN_GAP_EMS: f64 = 1.0;

/// Group glyphs into lines, top to bottom, and split each line into cells
/// at column-sized gaps.
pub fn layout_rows(glyphs: &[Glyph]) -> Vec<Vec<String>> {
    let mut visible: Vec<&Glyph> = glyphs.iter().filter(|g| !g.text.trim().is_empty()).collect();
    visible.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));

    let mut lines: Vec<Vec<&Glyph>> = Vec::new();
    for glyph in visible {
        match lines.last_mut() {
            Some(line) if (glyph.y - line[0].y).abs() <= line[0].size.max(glyph.size) * LINE_TOLERANCE_EMS => {
                line.push(glyph)
            }
            _ => lines.push(vec![glyph]),
        }
    }

    lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.x.total_cmp(&b.x));
            split_cells(&line)
        })
        .collect()
}

fn split_cells(line: &[&Glyph]) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut last_end: Option<f64> = None;

    for glyph in line {
        if let Some(end) = last_end {
            let gap = glyph.x - end;
            if gap > glyph.size * COLUMN_GAP_EMS {
                cells.push(std::mem::take(&mut current));
            } else if gap > glyph.size * WORD_GAP_EMS {
                current.push(' ');
            }
        }
        current.push_str(&glyph.text);
        last_end = Some(last_end.map_or(glyph.end, |end| end.max(glyph.end)));
    }

    if !current.is_empty() {
        cells.push(current);
    }
    cells
}

/// Consecutive rows with the same number of cells (at least two) form a
/// grid; a grid needs at least two rows.
pub fn group_table_rows(rows: Vec<Vec<String>>) -> Vec<TableGrid> {
    let mut tables = Vec::new();
    let mut current: TableGrid = Vec::new();

    let mut flush = |current: &mut TableGrid| {
        if current.len() >= 2 {
            tables.push(std::mem::take(current));
        } else {
            current.clear();
        }
    };

    for cells in rows {
        if cells.len() < 2 {
            flush(&mut current);
            continue;
        }
        if current.first().map_or(false, |header| header.len() != cells.len()) {
            flush(&mut current);
        }
        current.push(cells.into_iter().map(Some).collect());
    }
    flush(&mut current);

    tables
}

pub fn tables_from_glyphs(glyphs: &[Glyph]) -> Vec<TableGrid> {
    group_table_rows(layout_rows(glyphs))
}
