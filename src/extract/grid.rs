//! Geometric table detectors.
//!
//! Lattice detection reads explicit column ruling (`|` separators, as
//! produced by text layers of bordered tables); stream detection infers
//! borderless columns from whitespace alignment. Both tag their output
//! with an accuracy score so the extractor can discard weak results.

use crate::extract::{row_from_texts, DetectionMethod, ExtractedTable};
use regex::Regex;
use std::sync::OnceLock;

const MIN_TABLE_ROWS: usize = 2;
const MIN_STREAM_ROWS: usize = 3;
const LATTICE_BASE_CONFIDENCE: f64 = 0.85;
const STREAM_BASE_CONFIDENCE: f64 = 0.75;

static GAP_RE: OnceLock<Regex> = OnceLock::new();

fn gap_re() -> &'static Regex {
    GAP_RE.get_or_init(|| Regex::new(r" {2,}|\t+").expect("gap pattern compiles"))
}

/// Bordered-table detection over ruled lines. Consecutive `|`-delimited
/// lines form a candidate table; its confidence scales with how consistent
/// the column counts are.
pub fn extract_lattice(page: usize, page_text: &str) -> Vec<ExtractedTable> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();

    for line in page_text.lines() {
        if is_ruling_line(line) {
            continue;
        }
        if line.contains('|') {
            let cells: Vec<String> = line
                .split('|')
                .map(|c| c.trim().to_string())
                .skip_while(|c| c.is_empty())
                .collect();
            let mut cells = cells;
            while cells.last().is_some_and(|c| c.is_empty()) {
                cells.pop();
            }
            if !cells.is_empty() {
                run.push(cells);
                continue;
            }
        }
        flush_lattice(page, &mut run, &mut tables);
    }
    flush_lattice(page, &mut run, &mut tables);
    tables
}

/// Horizontal rule rows like `+-----+-----+` carry no cell content.
fn is_ruling_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| matches!(c, '-' | '=' | '+' | '|' | '_' | ' '))
        && trimmed.chars().any(|c| matches!(c, '-' | '=' | '_'))
}

fn flush_lattice(page: usize, run: &mut Vec<Vec<String>>, tables: &mut Vec<ExtractedTable>) {
    if run.len() >= MIN_TABLE_ROWS {
        let consistency = column_consistency(run);
        let rows = run
            .drain(..)
            .enumerate()
            .map(|(idx, cells)| row_from_texts(idx, cells))
            .collect();
        tables.push(ExtractedTable {
            page,
            rows,
            bbox: None,
            confidence: LATTICE_BASE_CONFIDENCE * consistency,
            method: DetectionMethod::Lattice,
        });
    } else {
        run.clear();
    }
}

/// Borderless detection: lines split at 2+ space gaps, grouped into
/// contiguous blocks whose modal column count holds for most lines.
pub fn extract_stream(page: usize, page_text: &str) -> Vec<ExtractedTable> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();

    for line in page_text.lines() {
        let trimmed = line.trim_end();
        if trimmed.trim().is_empty() {
            flush_stream(page, &mut run, &mut tables);
            continue;
        }
        let cells: Vec<String> = gap_re()
            .split(trimmed.trim())
            .map(|c| c.to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if cells.len() >= 2 {
            run.push(cells);
        } else {
            flush_stream(page, &mut run, &mut tables);
        }
    }
    flush_stream(page, &mut run, &mut tables);
    tables
}

fn flush_stream(page: usize, run: &mut Vec<Vec<String>>, tables: &mut Vec<ExtractedTable>) {
    if run.len() >= MIN_STREAM_ROWS {
        let consistency = column_consistency(run);
        let rows = run
            .drain(..)
            .enumerate()
            .map(|(idx, cells)| row_from_texts(idx, cells))
            .collect();
        tables.push(ExtractedTable {
            page,
            rows,
            bbox: None,
            confidence: STREAM_BASE_CONFIDENCE * consistency,
            method: DetectionMethod::Stream,
        });
    } else {
        run.clear();
    }
}

/// Fraction of rows sharing the modal column count.
fn column_consistency(rows: &[Vec<String>]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let mut counts: Vec<usize> = rows.iter().map(|r| r.len()).collect();
    counts.sort_unstable();
    let mut best = 0usize;
    let mut current = 1usize;
    for i in 1..counts.len() {
        if counts[i] == counts[i - 1] {
            current += 1;
        } else {
            best = best.max(current);
            current = 1;
        }
    }
    best = best.max(current);
    best as f64 / rows.len() as f64
}
