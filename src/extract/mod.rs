//! Table detection and extraction from financial-statement PDFs.
//!
//! Per page, strategies run cheapest-first: full-line text parsing,
//! bordered-table (lattice) detection, borderless (stream) detection, and
//! an OCR fallback for pages with a near-empty native text layer. The first
//! strategy that yields substantial structured content wins; anything a
//! later strategy re-finds is deduplicated by page, shape, and leading-row
//! text. Every cell runs through the numeric parser.

pub mod grid;
pub mod ocr;
pub mod textline;

use crate::error::{Result, StatementMapperError};
use crate::numeric::{parse_numeric, ParsedNumber};
use log::{debug, info};
use ocr::OcrBackend;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMethod {
    /// Label-plus-trailing-numerals line parsing over the native text layer.
    TextLine,
    /// Bordered-table geometry (explicit column ruling).
    Lattice,
    /// Borderless detection from whitespace alignment.
    Stream,
    /// Rasterized-page OCR fallback.
    Ocr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedCell {
    pub text: String,
    pub row: usize,
    pub col: usize,
    pub bbox: Option<BoundingBox>,
    pub parsed: ParsedNumber,
}

impl ExtractedCell {
    pub fn new(text: impl Into<String>, row: usize, col: usize) -> Self {
        let text = text.into();
        let parsed = parse_numeric(&text);
        Self {
            text,
            row,
            col,
            bbox: None,
            parsed,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.parsed.is_numeric()
    }
}

/// One detected table. Never mutated after extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTable {
    /// 1-based page number.
    pub page: usize,
    pub rows: Vec<Vec<ExtractedCell>>,
    pub bbox: Option<BoundingBox>,
    pub confidence: f64,
    pub method: DetectionMethod,
}

impl ExtractedTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    pub fn numeric_cell_count(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|r| r.iter())
            .filter(|c| c.is_numeric())
            .count()
    }

    /// Dedup key: page, shape, and the first row's leading text.
    fn signature(&self) -> (usize, usize, String) {
        let leading = self
            .rows
            .first()
            .and_then(|r| r.first())
            .map(|c| {
                c.text
                    .to_lowercase()
                    .chars()
                    .filter(|ch| ch.is_ascii_alphanumeric())
                    .take(32)
                    .collect()
            })
            .unwrap_or_default();
        (self.page, self.row_count(), leading)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub tables: Vec<ExtractedTable>,
    pub page_count: usize,
}

/// A table is worth stopping for once it has a couple of rows and real
/// numeric content.
const MIN_SUBSTANTIAL_ROWS: usize = 2;
const MIN_SUBSTANTIAL_NUMERIC_CELLS: usize = 2;
/// Lattice/stream results scoring below this are discarded.
const DETECTOR_QUALITY_FLOOR: f64 = 0.5;
/// Native text layers shorter than this trigger the OCR fallback.
const OCR_TEXT_FLOOR: usize = 32;

pub struct TableExtractor {
    ocr: Option<Box<dyn OcrBackend>>,
}

impl Default for TableExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TableExtractor {
    pub fn new() -> Self {
        Self { ocr: None }
    }

    pub fn with_ocr_backend(mut self, backend: Box<dyn OcrBackend>) -> Self {
        self.ocr = Some(backend);
        self
    }

    /// Detect tables across every page of the document.
    ///
    /// An unrecognized page yields zero tables, never an error; only a file
    /// that cannot be opened at all is fatal.
    pub fn detect_tables(&self, path: impl AsRef<Path>) -> Result<ExtractionResult> {
        let path = path.as_ref();
        let pages = pdf_extract::extract_text_by_pages(path).map_err(|e| {
            StatementMapperError::DocumentOpen {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        if pages.is_empty() {
            return Err(StatementMapperError::EmptyDocument {
                path: path.display().to_string(),
            });
        }

        info!(
            "Detecting tables in '{}' ({} pages)",
            path.display(),
            pages.len()
        );

        let mut tables = Vec::new();
        for (idx, page_text) in pages.iter().enumerate() {
            let page_tables = self.extract_page(path, idx + 1, page_text);
            debug!("page {}: {} table(s)", idx + 1, page_tables.len());
            for table in page_tables {
                push_deduplicated(&mut tables, table);
            }
        }

        Ok(ExtractionResult {
            page_count: pages.len(),
            tables,
        })
    }

    /// Strategy cascade for one page of native text.
    pub(crate) fn extract_page(
        &self,
        path: &Path,
        page: usize,
        page_text: &str,
    ) -> Vec<ExtractedTable> {
        let mut kept: Vec<ExtractedTable> = Vec::new();

        // (d) runs instead of the text strategies when the native layer is
        // near-empty; otherwise it is never reached.
        if page_text.trim().len() < OCR_TEXT_FLOOR {
            if let Some(backend) = &self.ocr {
                match ocr::extract(backend.as_ref(), path, page) {
                    Ok(tables) => {
                        for table in tables {
                            push_deduplicated(&mut kept, table);
                        }
                    }
                    Err(e) => debug!("ocr fallback failed on page {}: {}", page, e),
                }
            } else {
                debug!("page {} has no usable text layer and no OCR backend", page);
            }
            return kept;
        }

        // (a) cheapest, and preferred because labels are never truncated.
        for table in textline::extract(page, page_text) {
            push_deduplicated(&mut kept, table);
        }
        if substantial(&kept) {
            return kept;
        }

        // (b) bordered tables from explicit ruling characters.
        for table in grid::extract_lattice(page, page_text) {
            if table.confidence >= DETECTOR_QUALITY_FLOOR {
                push_deduplicated(&mut kept, table);
            }
        }
        if substantial(&kept) {
            return kept;
        }

        // (c) borderless detection from whitespace alignment.
        for table in grid::extract_stream(page, page_text) {
            if table.confidence >= DETECTOR_QUALITY_FLOOR {
                push_deduplicated(&mut kept, table);
            }
        }

        kept
    }
}

fn substantial(tables: &[ExtractedTable]) -> bool {
    tables.iter().any(|t| {
        t.row_count() >= MIN_SUBSTANTIAL_ROWS
            && t.numeric_cell_count() >= MIN_SUBSTANTIAL_NUMERIC_CELLS
    })
}

/// Keep the earlier (cheaper, better-labelled) table on a signature clash.
fn push_deduplicated(kept: &mut Vec<ExtractedTable>, table: ExtractedTable) {
    let signature = table.signature();
    if kept.iter().any(|t| t.signature() == signature) {
        debug!(
            "dropping duplicate table on page {} ({:?})",
            table.page, table.method
        );
        return;
    }
    kept.push(table);
}

/// Build a parsed cell row from raw strings; used by the strategies.
pub(crate) fn row_from_texts(row: usize, texts: Vec<String>) -> Vec<ExtractedCell> {
    texts
        .into_iter()
        .enumerate()
        .map(|(col, text)| ExtractedCell::new(text, row, col))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_from_lines(page: usize, lines: &[&[&str]], method: DetectionMethod) -> ExtractedTable {
        let rows = lines
            .iter()
            .enumerate()
            .map(|(row, cells)| {
                cells
                    .iter()
                    .enumerate()
                    .map(|(col, text)| ExtractedCell::new(*text, row, col))
                    .collect()
            })
            .collect();
        ExtractedTable {
            page,
            rows,
            bbox: None,
            confidence: 0.9,
            method,
        }
    }

    #[test]
    fn test_cell_numeric_parse() {
        let cell = ExtractedCell::new("(1,234)", 0, 1);
        assert!(cell.is_numeric());
        assert_eq!(cell.parsed.value, Some(-1234.0));

        let cell = ExtractedCell::new("Revenue", 0, 0);
        assert!(!cell.is_numeric());
    }

    #[test]
    fn test_dedup_by_signature() {
        let mut kept = Vec::new();
        let a = table_from_lines(
            1,
            &[&["Revenue", "1,000"], &["COGS", "400"]],
            DetectionMethod::TextLine,
        );
        let b = table_from_lines(
            1,
            &[&["Revenue", "1,000"], &["COGS", "400"]],
            DetectionMethod::Stream,
        );
        push_deduplicated(&mut kept, a);
        push_deduplicated(&mut kept, b);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].method, DetectionMethod::TextLine);

        // Different page: not a duplicate.
        let c = table_from_lines(
            2,
            &[&["Revenue", "1,000"], &["COGS", "400"]],
            DetectionMethod::Stream,
        );
        push_deduplicated(&mut kept, c);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_page_cascade_prefers_textline() {
        let extractor = TableExtractor::new();
        let text = "Income Statement\n\
                    Revenue 1,000,000\n\
                    Cost of Goods Sold 400,000\n\
                    Gross Profit 600,000\n";
        let tables = extractor.extract_page(Path::new("test.pdf"), 1, text);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].method, DetectionMethod::TextLine);
        assert_eq!(tables[0].row_count(), 3);
    }

    #[test]
    fn test_unrecognized_page_yields_no_tables() {
        let extractor = TableExtractor::new();
        let tables = extractor.extract_page(
            Path::new("test.pdf"),
            1,
            "A narrative paragraph with no figures in it whatsoever.",
        );
        assert!(tables.is_empty());
    }

    #[test]
    fn test_near_empty_page_without_ocr_backend() {
        let extractor = TableExtractor::new();
        let tables = extractor.extract_page(Path::new("test.pdf"), 1, "  \n ");
        assert!(tables.is_empty());
    }
}
