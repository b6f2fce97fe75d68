//! Workbook structure analysis.
//!
//! Parses a workbook, infers sections and period columns per sheet,
//! builds the formula dependency graph, and aligns label cells to the
//! taxonomy. The combined [`WorkbookAnalysis`] is what the mapping engine
//! consumes as its target side.

pub mod align;
pub mod graph;
pub mod parser;
pub mod structure;

use crate::classify::CascadeClassifier;
use crate::error::Result;
use crate::mapping::TemplateTarget;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use align::{AlignedCell, AlignmentSummary};
pub use graph::{CellType, DependencyGraph};
pub use parser::{CellValue, ParsedCell, ParsedSheet, ParsedWorkbook};
pub use structure::{PeriodColumn, PeriodFrequency, Section, SheetStructure};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookAnalysis {
    pub workbook: ParsedWorkbook,
    pub structures: Vec<SheetStructure>,
    pub graph: DependencyGraph,
    pub alignments: Vec<AlignedCell>,
    pub summary: AlignmentSummary,
}

impl WorkbookAnalysis {
    pub fn structure_for(&self, sheet: &str) -> Option<&SheetStructure> {
        self.structures.iter().find(|s| s.sheet == sheet)
    }

    /// Enumerates the writable cells of the template: for every aligned
    /// label row, one target per period column, restricted to cells the
    /// dependency graph does not mark as calculated. Formula cells must
    /// keep their formulas, so only literal (or empty) cells qualify.
    pub fn template_targets(&self) -> Vec<TemplateTarget> {
        let mut targets = Vec::new();

        for aligned in &self.alignments {
            let Some(structure) = self.structure_for(&aligned.sheet) else {
                continue;
            };
            let Some(sheet) = self
                .workbook
                .sheets
                .iter()
                .find(|s| s.name == aligned.sheet)
            else {
                continue;
            };

            for period in &structure.periods {
                let key = format!(
                    "{}!{}",
                    aligned.sheet,
                    parser::cell_address(aligned.row, period.col)
                );
                let cell = sheet.cell(aligned.row, period.col);
                let has_formula = cell.map(|c| c.formula.is_some()).unwrap_or(false)
                    || self
                        .graph
                        .node(&key)
                        .map(|n| n.cell_type == CellType::Calculated)
                        .unwrap_or(false);

                targets.push(TemplateTarget {
                    sheet: aligned.sheet.clone(),
                    row: aligned.row,
                    col: period.col,
                    address: key,
                    label: aligned.label.clone(),
                    item_id: aligned.item_id.clone(),
                    period: Some(period.period_key()),
                    is_input: !has_formula,
                    existing_value: cell.and_then(|c| c.value.as_number()),
                });
            }
        }

        targets
    }
}

/// Front door for workbook analysis. Holds the cascade used to align
/// label cells.
pub struct SpreadsheetAnalyzer<'a> {
    cascade: &'a CascadeClassifier,
}

impl<'a> SpreadsheetAnalyzer<'a> {
    pub fn new(cascade: &'a CascadeClassifier) -> Self {
        SpreadsheetAnalyzer { cascade }
    }

    pub fn analyze(&self, path: &Path) -> Result<WorkbookAnalysis> {
        let workbook = parser::parse_workbook(path)?;
        Ok(self.analyze_workbook(workbook))
    }

    pub fn analyze_workbook(&self, workbook: ParsedWorkbook) -> WorkbookAnalysis {
        let graph = graph::build_graph(&workbook);

        let mut structures = Vec::new();
        let mut alignments = Vec::new();
        let mut summary = AlignmentSummary::default();

        for sheet in &workbook.sheets {
            let structure = structure::infer_structure(sheet);
            let (aligned, sheet_summary) = align::align_labels(sheet, &structure, self.cascade);
            summary.merge(&sheet_summary);
            alignments.extend(aligned);
            structures.push(structure);
        }

        info!(
            "analyzed workbook '{}': {} sheets, {} aligned labels, {} formula cells{}",
            workbook.path,
            workbook.sheets.len(),
            summary.aligned,
            graph.calculated_count(),
            if graph.has_cycles {
                ", circular references detected"
            } else {
                ""
            }
        );

        WorkbookAnalysis {
            workbook,
            structures,
            graph,
            alignments,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::OntologyIndex;
    use crate::spreadsheet::parser::cell_address;
    use std::sync::Arc;

    fn text_cell(row: u32, col: u32, text: &str) -> ParsedCell {
        ParsedCell {
            row,
            col,
            address: cell_address(row, col),
            value: CellValue::Text(text.to_string()),
            formula: None,
        }
    }

    fn number_cell(row: u32, col: u32, n: f64) -> ParsedCell {
        ParsedCell {
            row,
            col,
            address: cell_address(row, col),
            value: CellValue::Number(n),
            formula: None,
        }
    }

    fn model_workbook() -> ParsedWorkbook {
        let mut gross = number_cell(4, 1, 600_000.0);
        gross.formula = Some("=B3-B4".to_string());
        ParsedWorkbook {
            path: "model.xlsx".to_string(),
            sheets: vec![ParsedSheet::new(
                "Model",
                vec![
                    text_cell(0, 0, "Income Statement"),
                    text_cell(1, 1, "FY2023"),
                    text_cell(2, 0, "Revenue"),
                    number_cell(2, 1, 1_000_000.0),
                    text_cell(3, 0, "Cost of Goods Sold"),
                    number_cell(3, 1, 400_000.0),
                    text_cell(4, 0, "Gross Profit"),
                    gross,
                ],
            )],
            defined_names: Vec::new(),
        }
    }

    #[test]
    fn test_analyze_workbook_end_to_end() {
        let cascade = CascadeClassifier::new(Arc::new(OntologyIndex::builtin()));
        let analysis = SpreadsheetAnalyzer::new(&cascade).analyze_workbook(model_workbook());

        assert_eq!(analysis.structures.len(), 1);
        assert_eq!(analysis.summary.aligned, 3);
        assert!(analysis.graph.is_input("Model!B3"));
        assert!(!analysis.graph.is_input("Model!B5"));
    }

    #[test]
    fn test_template_targets_exclude_formula_cells() {
        let cascade = CascadeClassifier::new(Arc::new(OntologyIndex::builtin()));
        let analysis = SpreadsheetAnalyzer::new(&cascade).analyze_workbook(model_workbook());

        let targets = analysis.template_targets();
        // One period column, three aligned rows.
        assert_eq!(targets.len(), 3);

        let revenue = targets.iter().find(|t| t.label == "Revenue").unwrap();
        assert!(revenue.is_input);
        assert_eq!(revenue.address, "Model!B3");
        assert_eq!(revenue.period.as_deref(), Some("2023"));
        assert_eq!(revenue.existing_value, Some(1_000_000.0));

        let gross = targets.iter().find(|t| t.label == "Gross Profit").unwrap();
        assert!(!gross.is_input);
    }
}
