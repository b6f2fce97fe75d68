//! Workbook parsing via calamine.
//!
//! Loads every non-empty cell per sheet together with its formula text and
//! the workbook's defined names, into a read-only mirror the structure
//! inference and dependency graph work from.

use crate::error::{Result, StatementMapperError};
use calamine::{open_workbook_auto, Data, Reader, Sheets};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    /// Excel serial date value.
    Date(f64),
    Error(String),
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn display_text(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => crate::numeric::format_value(*n),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Date(serial) => format!("{}", serial),
            CellValue::Error(e) => e.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedCell {
    /// 0-based row/column.
    pub row: u32,
    pub col: u32,
    /// A1-style address within the sheet.
    pub address: String,
    pub value: CellValue,
    /// Formula text without a leading `=`.
    pub formula: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SheetData")]
pub struct ParsedSheet {
    pub name: String,
    pub cells: Vec<ParsedCell>,
    #[serde(skip)]
    index: HashMap<(u32, u32), usize>,
}

/// Serialized shape of a sheet; the lookup index is rebuilt on the way in.
#[derive(Deserialize)]
struct SheetData {
    name: String,
    cells: Vec<ParsedCell>,
}

impl From<SheetData> for ParsedSheet {
    fn from(data: SheetData) -> Self {
        ParsedSheet::new(data.name, data.cells)
    }
}

impl ParsedSheet {
    pub fn new(name: impl Into<String>, cells: Vec<ParsedCell>) -> Self {
        let index = cells
            .iter()
            .enumerate()
            .map(|(i, c)| ((c.row, c.col), i))
            .collect();
        Self {
            name: name.into(),
            cells,
            index,
        }
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&ParsedCell> {
        self.index.get(&(row, col)).map(|i| &self.cells[*i])
    }

    pub fn max_row(&self) -> u32 {
        self.cells.iter().map(|c| c.row).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedWorkbook {
    pub path: String,
    pub sheets: Vec<ParsedSheet>,
    /// Workbook defined names: (name, reference).
    pub defined_names: Vec<(String, String)>,
}

impl ParsedWorkbook {
    pub fn sheet(&self, name: &str) -> Option<&ParsedSheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

/// Load a workbook file (xlsx/xls/ods) into the read-only mirror.
///
/// A workbook with zero sheets is a structural failure; a sheet with zero
/// cells is simply empty.
pub fn parse_workbook(path: impl AsRef<Path>) -> Result<ParsedWorkbook> {
    let path = path.as_ref();
    let mut workbook = open_workbook_auto(path)?;

    let sheet_names = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        return Err(StatementMapperError::EmptyWorkbook {
            path: path.display().to_string(),
        });
    }

    info!(
        "Parsing workbook '{}' ({} sheets)",
        path.display(),
        sheet_names.len()
    );

    let defined_names = collect_defined_names(&workbook);

    let mut sheets = Vec::with_capacity(sheet_names.len());
    for name in &sheet_names {
        let range = workbook.worksheet_range(name)?;
        let mut formulas: HashMap<(u32, u32), String> = HashMap::new();
        if let Ok(formula_range) = workbook.worksheet_formula(name) {
            let (start_row, start_col) = formula_range.start().unwrap_or((0, 0));
            for (r, c, formula) in formula_range.used_cells() {
                let trimmed = formula.trim_start_matches('=').trim();
                if !trimmed.is_empty() {
                    formulas.insert(
                        (start_row + r as u32, start_col + c as u32),
                        trimmed.to_string(),
                    );
                }
            }
        }

        let (range_row, range_col) = range.start().unwrap_or((0, 0));
        let mut cells = Vec::new();
        for (r, c, data) in range.used_cells() {
            let row = range_row + r as u32;
            let col = range_col + c as u32;
            let Some(value) = convert_value(data) else {
                continue;
            };
            cells.push(ParsedCell {
                row,
                col,
                address: cell_address(row, col),
                value,
                formula: formulas.remove(&(row, col)),
            });
        }
        debug!("sheet '{}': {} non-empty cells", name, cells.len());
        sheets.push(ParsedSheet::new(name.clone(), cells));
    }

    Ok(ParsedWorkbook {
        path: path.display().to_string(),
        sheets,
        defined_names,
    })
}

fn collect_defined_names(workbook: &Sheets<std::io::BufReader<std::fs::File>>) -> Vec<(String, String)> {
    match workbook {
        Sheets::Xlsx(xlsx) => xlsx.defined_names().to_vec(),
        _ => Vec::new(),
    }
}

fn convert_value(data: &Data) -> Option<CellValue> {
    match data {
        Data::Empty => None,
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(CellValue::Text(trimmed.to_string()))
            }
        }
        Data::Int(i) => Some(CellValue::Number(*i as f64)),
        Data::Float(f) => Some(CellValue::Number(*f)),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        Data::DateTime(dt) => Some(CellValue::Date(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(CellValue::Text(s.clone())),
        Data::Error(e) => Some(CellValue::Error(format!("{:?}", e))),
    }
}

/// 0-based (row, col) to an A1-style address.
pub fn cell_address(row: u32, col: u32) -> String {
    format!("{}{}", column_letters(col), row + 1)
}

pub fn column_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (col % 26) as u8);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// A1-style address back to 0-based (row, col).
pub fn parse_address(address: &str) -> Option<(u32, u32)> {
    let address = address.replace('$', "");
    let split = address.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = address.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col - 1))
}
