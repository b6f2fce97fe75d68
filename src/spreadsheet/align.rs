//! Aligns label cells in a structured sheet to taxonomy items.
//!
//! Alignment runs each label cell through the classification cascade with
//! the statement type of its enclosing section as context, keeping the top
//! alternatives alongside the winner so low-confidence decisions can be
//! reviewed rather than silently trusted.

use crate::classify::{Candidate, CascadeClassifier};
use crate::ontology::StatementType;
use crate::spreadsheet::parser::{cell_address, ParsedSheet};
use crate::spreadsheet::structure::SheetStructure;
use log::debug;
use serde::{Deserialize, Serialize};

/// Alternatives carried with each aligned cell.
const MAX_ALTERNATIVES: usize = 3;
/// Above this, no review needed.
const HIGH_CONFIDENCE: f64 = 0.8;
/// Below this, the alignment is suspect.
const LOW_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignedCell {
    pub sheet: String,
    pub row: u32,
    pub col: u32,
    pub address: String,
    /// The label text as it appears in the cell.
    pub label: String,
    pub item_id: Option<String>,
    pub item_label: Option<String>,
    pub confidence: f64,
    pub section_type: Option<StatementType>,
    pub alternatives: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentSummary {
    pub total_labels: usize,
    pub aligned: usize,
    pub high_confidence: usize,
    pub low_confidence: usize,
}

impl AlignmentSummary {
    pub fn merge(&mut self, other: &AlignmentSummary) {
        self.total_labels += other.total_labels;
        self.aligned += other.aligned;
        self.high_confidence += other.high_confidence;
        self.low_confidence += other.low_confidence;
    }
}

/// Classifies every text cell in the label column against the taxonomy.
pub fn align_labels(
    sheet: &ParsedSheet,
    structure: &SheetStructure,
    cascade: &CascadeClassifier,
) -> (Vec<AlignedCell>, AlignmentSummary) {
    let mut aligned = Vec::new();
    let mut summary = AlignmentSummary::default();

    let Some(label_col) = structure.label_col else {
        debug!("sheet '{}': no label column, nothing to align", sheet.name);
        return (aligned, summary);
    };

    for cell in &sheet.cells {
        if cell.col != label_col {
            continue;
        }
        let Some(text) = cell.value.as_text() else {
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }
        // Section header rows name the section, not a line item.
        if structure
            .sections
            .iter()
            .any(|s| s.start_row == cell.row && s.name == text)
        {
            continue;
        }

        let section_type = structure.section_at(cell.row).map(|s| s.statement_type);
        let result = cascade.classify_in_section(text, section_type);

        summary.total_labels += 1;
        if result.is_match() {
            summary.aligned += 1;
            if result.confidence >= HIGH_CONFIDENCE {
                summary.high_confidence += 1;
            } else if result.confidence < LOW_CONFIDENCE {
                summary.low_confidence += 1;
            }
        }

        let alternatives = result
            .candidates
            .iter()
            .filter(|c| Some(&c.item_id) != result.item_id.as_ref())
            .take(MAX_ALTERNATIVES)
            .cloned()
            .collect();

        aligned.push(AlignedCell {
            sheet: sheet.name.clone(),
            row: cell.row,
            col: cell.col,
            address: cell_address(cell.row, cell.col),
            label: text.to_string(),
            item_id: result.item_id,
            item_label: result.label,
            confidence: result.confidence,
            section_type,
            alternatives,
        });
    }

    debug!(
        "sheet '{}': aligned {}/{} labels ({} high confidence)",
        sheet.name, summary.aligned, summary.total_labels, summary.high_confidence
    );

    (aligned, summary)
}
