//! OCR fallback for scanned pages.
//!
//! The engine itself is dependency-injected: the backend rasterizes and
//! recognizes one page, returning positioned tokens with per-token
//! confidence. Tokens are grouped into rows by vertical overlap and into
//! cells by horizontal gaps; each token's confidence carries through to
//! its cell, and the table's confidence is the token mean.

use crate::error::Result;
use crate::extract::{BoundingBox, DetectionMethod, ExtractedCell, ExtractedTable};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrToken {
    pub text: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// A page-level OCR engine. Absent backend means the OCR strategy is
/// skipped, not an error.
pub trait OcrBackend: Send + Sync {
    /// Recognize one page (1-based) of the document at `path`.
    fn recognize_page(&self, path: &Path, page: usize) -> Result<Vec<OcrToken>>;
}

/// Horizontal gap (relative to mean token width) that separates cells.
const CELL_GAP_FACTOR: f64 = 1.5;
const MIN_TABLE_ROWS: usize = 2;

pub(crate) fn extract(
    backend: &dyn OcrBackend,
    path: &Path,
    page: usize,
) -> Result<Vec<ExtractedTable>> {
    let tokens = backend.recognize_page(path, page)?;
    Ok(tables_from_tokens(page, tokens))
}

pub(crate) fn tables_from_tokens(page: usize, tokens: Vec<OcrToken>) -> Vec<ExtractedTable> {
    if tokens.is_empty() {
        return Vec::new();
    }

    let mean_width = tokens.iter().map(|t| t.bbox.width).sum::<f64>() / tokens.len() as f64;
    let gap = (mean_width * CELL_GAP_FACTOR).max(1.0);

    let mut lines = group_into_lines(tokens);
    for line in &mut lines {
        line.sort_by(|a, b| {
            a.bbox
                .x
                .partial_cmp(&b.bbox.x)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    let mut rows: Vec<Vec<ExtractedCell>> = Vec::new();
    let mut confidences: Vec<f64> = Vec::new();
    for (row_idx, line) in lines.iter().enumerate() {
        let mut cells: Vec<ExtractedCell> = Vec::new();
        let mut current: Vec<&OcrToken> = Vec::new();
        for token in line {
            let starts_new_cell = current.last().is_some_and(|prev| {
                token.bbox.x - (prev.bbox.x + prev.bbox.width) > gap
            });
            if starts_new_cell {
                cells.push(cell_from_tokens(row_idx, cells.len(), &current));
                current.clear();
            }
            current.push(token);
        }
        if !current.is_empty() {
            cells.push(cell_from_tokens(row_idx, cells.len(), &current));
        }
        confidences.extend(line.iter().map(|t| t.confidence));
        rows.push(cells);
    }

    if rows.len() < MIN_TABLE_ROWS {
        return Vec::new();
    }

    let confidence = confidences.iter().sum::<f64>() / confidences.len().max(1) as f64;
    vec![ExtractedTable {
        page,
        rows,
        bbox: None,
        confidence,
        method: DetectionMethod::Ocr,
    }]
}

/// Group tokens into text lines by vertical-center proximity.
fn group_into_lines(mut tokens: Vec<OcrToken>) -> Vec<Vec<OcrToken>> {
    tokens.sort_by(|a, b| {
        a.bbox
            .y
            .partial_cmp(&b.bbox.y)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut lines: Vec<Vec<OcrToken>> = Vec::new();
    for token in tokens {
        let center = token.bbox.y + token.bbox.height / 2.0;
        let fits_last = lines.last().is_some_and(|line| {
            line.iter().any(|t| {
                let other_center = t.bbox.y + t.bbox.height / 2.0;
                (center - other_center).abs() < t.bbox.height.max(token.bbox.height) / 2.0
            })
        });
        if fits_last {
            if let Some(line) = lines.last_mut() {
                line.push(token);
            }
        } else {
            lines.push(vec![token]);
        }
    }
    lines
}

fn cell_from_tokens(row: usize, col: usize, tokens: &[&OcrToken]) -> ExtractedCell {
    let text = tokens
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let mut cell = ExtractedCell::new(text, row, col);

    let min_conf = tokens
        .iter()
        .map(|t| t.confidence)
        .fold(f64::INFINITY, f64::min);
    if min_conf.is_finite() {
        // A cell is only as trustworthy as its weakest token.
        cell.parsed.confidence = cell.parsed.confidence.min(min_conf);
    }

    if let Some(first) = tokens.first() {
        let x = first.bbox.x;
        let y = tokens
            .iter()
            .map(|t| t.bbox.y)
            .fold(f64::INFINITY, f64::min);
        let right = tokens
            .iter()
            .map(|t| t.bbox.x + t.bbox.width)
            .fold(0.0f64, f64::max);
        let bottom = tokens
            .iter()
            .map(|t| t.bbox.y + t.bbox.height)
            .fold(0.0f64, f64::max);
        cell.bbox = Some(BoundingBox {
            x,
            y,
            width: right - x,
            height: bottom - y,
        });
    }
    cell
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(text: &str, x: f64, y: f64, confidence: f64) -> OcrToken {
        OcrToken {
            text: text.to_string(),
            confidence,
            bbox: BoundingBox {
                x,
                y,
                width: 40.0,
                height: 10.0,
            },
        }
    }

    #[test]
    fn test_tokens_form_rows_and_cells() {
        let tokens = vec![
            token("Revenue", 10.0, 10.0, 0.98),
            token("1,000", 400.0, 10.0, 0.95),
            token("Cost", 10.0, 30.0, 0.97),
            token("of", 55.0, 30.0, 0.96),
            token("Sales", 100.0, 30.0, 0.97),
            token("(400)", 400.0, 30.0, 0.90),
        ];
        let tables = tables_from_tokens(1, tokens);
        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(table.method, DetectionMethod::Ocr);
        assert_eq!(table.row_count(), 2);

        assert_eq!(table.rows[0][0].text, "Revenue");
        assert_eq!(table.rows[0][1].parsed.value, Some(1000.0));
        assert_eq!(table.rows[1][0].text, "Cost of Sales");
        assert_eq!(table.rows[1][1].parsed.value, Some(-400.0));

        // OCR token confidence caps the numeric confidence.
        assert!(table.rows[1][1].parsed.confidence <= 0.90);
    }

    #[test]
    fn test_empty_tokens_yield_nothing() {
        assert!(tables_from_tokens(1, Vec::new()).is_empty());
    }

    #[test]
    fn test_single_line_is_not_a_table() {
        let tokens = vec![token("Statement", 10.0, 10.0, 0.9)];
        assert!(tables_from_tokens(1, tokens).is_empty());
    }
}
