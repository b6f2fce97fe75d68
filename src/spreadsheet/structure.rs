//! Section and period inference over a parsed sheet.
//!
//! Header-like rows are scanned for statement-type keywords to bound
//! sections, the first few rows for year/quarter patterns to find period
//! columns, and the leading columns for a sustained run of text cells to
//! pick the label column.

use crate::ontology::StatementType;
use crate::spreadsheet::parser::{CellValue, ParsedSheet};
use chrono::{Datelike, Duration, NaiveDate};
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub statement_type: StatementType,
    pub start_row: u32,
    pub end_row: u32,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodFrequency {
    Annual,
    Quarterly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodColumn {
    pub col: u32,
    pub label: String,
    pub year: Option<i32>,
    pub quarter: Option<u8>,
    pub frequency: PeriodFrequency,
}

impl PeriodColumn {
    /// Canonical period key, e.g. `"2023"` or `"2023-Q1"`.
    pub fn period_key(&self) -> String {
        match (self.year, self.quarter) {
            (Some(y), Some(q)) => format!("{}-Q{}", y, q),
            (Some(y), None) => y.to_string(),
            (None, Some(q)) => format!("Q{}", q),
            (None, None) => self.label.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetStructure {
    pub sheet: String,
    pub sections: Vec<Section>,
    pub periods: Vec<PeriodColumn>,
    pub label_col: Option<u32>,
    pub header_row: Option<u32>,
}

impl SheetStructure {
    pub fn section_at(&self, row: u32) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.start_row <= row && row <= s.end_row)
    }
}

const SECTION_KEYWORDS: &[(&str, StatementType)] = &[
    ("income statement", StatementType::IncomeStatement),
    ("profit and loss", StatementType::IncomeStatement),
    ("profit & loss", StatementType::IncomeStatement),
    ("p&l", StatementType::IncomeStatement),
    ("statement of operations", StatementType::IncomeStatement),
    ("statement of income", StatementType::IncomeStatement),
    ("balance sheet", StatementType::BalanceSheet),
    ("statement of financial position", StatementType::BalanceSheet),
    ("cash flow", StatementType::CashFlow),
    ("statement of cash flows", StatementType::CashFlow),
    ("cashflow", StatementType::CashFlow),
];

/// Rows scanned for period headers.
const PERIOD_SCAN_ROWS: u32 = 10;
/// Leading columns considered for the label column.
const LABEL_SCAN_COLS: u32 = 5;
/// Text cells a column needs to qualify as the label column.
const LABEL_MIN_TEXT_CELLS: usize = 3;

static YEAR_RE: OnceLock<Regex> = OnceLock::new();
static QUARTER_RE: OnceLock<Regex> = OnceLock::new();

fn year_re() -> &'static Regex {
    YEAR_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:FY\s?'?)?((?:19|20)\d{2})\b").expect("year pattern compiles")
    })
}

fn quarter_re() -> &'static Regex {
    QUARTER_RE.get_or_init(|| {
        Regex::new(r"(?i)\bQ([1-4])\b(?:[\s-]*((?:19|20)\d{2}))?").expect("quarter pattern compiles")
    })
}

pub fn infer_structure(sheet: &ParsedSheet) -> SheetStructure {
    let sections = infer_sections(sheet);
    let periods = infer_periods(sheet);
    let header_row = infer_header_row(sheet);
    let label_col = infer_label_col(sheet);

    debug!(
        "sheet '{}': {} sections, {} period columns, label col {:?}, header row {:?}",
        sheet.name,
        sections.len(),
        periods.len(),
        label_col,
        header_row
    );

    SheetStructure {
        sheet: sheet.name.clone(),
        sections,
        periods,
        label_col,
        header_row,
    }
}

/// Statement-type keyword hits in the leading columns open sections; each
/// section runs until the next hit (or the last row).
fn infer_sections(sheet: &ParsedSheet) -> Vec<Section> {
    let mut starts: Vec<(u32, String, StatementType)> = Vec::new();

    for cell in &sheet.cells {
        if cell.col >= LABEL_SCAN_COLS {
            continue;
        }
        let Some(text) = cell.value.as_text() else {
            continue;
        };
        let lowered = text.to_lowercase();
        if let Some((_, statement_type)) = SECTION_KEYWORDS
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword))
        {
            starts.push((cell.row, text.to_string(), *statement_type));
        }
    }

    starts.sort_by_key(|(row, _, _)| *row);
    starts.dedup_by_key(|(row, _, _)| *row);

    let max_row = sheet.max_row();
    starts
        .iter()
        .enumerate()
        .map(|(i, (row, name, statement_type))| {
            let end_row = starts
                .get(i + 1)
                .map(|(next, _, _)| next.saturating_sub(1))
                .unwrap_or(max_row);
            Section {
                name: name.clone(),
                statement_type: *statement_type,
                start_row: *row,
                end_row,
                confidence: 0.9,
            }
        })
        .collect()
}

/// Year/quarter patterns in the first few rows mark period columns. A
/// bare numeric cell holding a plausible year counts too.
fn infer_periods(sheet: &ParsedSheet) -> Vec<PeriodColumn> {
    let mut periods: Vec<PeriodColumn> = Vec::new();

    for cell in &sheet.cells {
        if cell.row >= PERIOD_SCAN_ROWS {
            continue;
        }
        let Some(period) = period_from_cell(cell.col, &cell.value) else {
            continue;
        };
        // One period per column; the earliest row wins.
        if !periods.iter().any(|p| p.col == cell.col) {
            periods.push(period);
        }
    }

    periods.sort_by_key(|p| p.col);
    periods
}

fn period_from_cell(col: u32, value: &CellValue) -> Option<PeriodColumn> {
    match value {
        CellValue::Number(n) => {
            let year = *n as i32;
            if (year as f64 - n).abs() < f64::EPSILON && (1900..=2100).contains(&year) {
                Some(PeriodColumn {
                    col,
                    label: year.to_string(),
                    year: Some(year),
                    quarter: None,
                    frequency: PeriodFrequency::Annual,
                })
            } else {
                None
            }
        }
        CellValue::Date(serial) => {
            let date = date_from_serial(*serial)?;
            let quarter = (date.month0() / 3 + 1) as u8;
            Some(PeriodColumn {
                col,
                label: date.format("%Y-%m-%d").to_string(),
                year: Some(date.year()),
                quarter: Some(quarter),
                frequency: PeriodFrequency::Quarterly,
            })
        }
        CellValue::Text(text) => {
            if let Some(caps) = quarter_re().captures(text) {
                let quarter: u8 = caps.get(1)?.as_str().parse().ok()?;
                let year = caps.get(2).and_then(|m| m.as_str().parse().ok());
                return Some(PeriodColumn {
                    col,
                    label: text.clone(),
                    year,
                    quarter: Some(quarter),
                    frequency: PeriodFrequency::Quarterly,
                });
            }
            if let Some(caps) = year_re().captures(text) {
                let year: i32 = caps.get(1)?.as_str().parse().ok()?;
                return Some(PeriodColumn {
                    col,
                    label: text.clone(),
                    year: Some(year),
                    quarter: None,
                    frequency: PeriodFrequency::Annual,
                });
            }
            None
        }
        _ => None,
    }
}

/// Workbook serial dates count days from 1899-12-30.
fn date_from_serial(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial as i64))
}

/// First row with two or more period-pattern hits.
fn infer_header_row(sheet: &ParsedSheet) -> Option<u32> {
    for row in 0..PERIOD_SCAN_ROWS {
        let hits = sheet
            .cells
            .iter()
            .filter(|c| c.row == row)
            .filter(|c| period_from_cell(c.col, &c.value).is_some())
            .count();
        if hits >= 2 {
            return Some(row);
        }
    }
    None
}

/// First leading column with a sustained count of text-bearing cells that
/// are not themselves period headers.
fn infer_label_col(sheet: &ParsedSheet) -> Option<u32> {
    for col in 0..LABEL_SCAN_COLS {
        let text_cells = sheet
            .cells
            .iter()
            .filter(|c| c.col == col)
            .filter(|c| c.value.as_text().is_some())
            .filter(|c| period_from_cell(c.col, &c.value).is_none())
            .count();
        if text_cells >= LABEL_MIN_TEXT_CELLS {
            return Some(col);
        }
    }
    None
}
