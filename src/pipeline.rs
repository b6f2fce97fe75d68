//! End-to-end document processing.
//!
//! Ties the table extractor and the classification cascade together: a
//! source document goes in, classified line items ready for the mapping
//! engine come out. Rows whose taxonomy item is calculated (subtotals)
//! are flagged so downstream sums do not double-count them.

use crate::classify::CascadeClassifier;
use crate::error::Result;
use crate::extract::{ExtractedTable, ExtractionResult, TableExtractor};
use crate::mapping::ExtractedItem;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentExtraction {
    pub extraction: ExtractionResult,
    pub items: Vec<ExtractedItem>,
}

impl DocumentExtraction {
    /// Items carrying both a taxonomy identity and a numeric value.
    pub fn mapped_values(&self) -> impl Iterator<Item = (&str, f64)> {
        self.items.iter().filter_map(|item| {
            Some((item.item_id.as_deref()?, item.value?))
        })
    }
}

pub struct DocumentPipeline<'a> {
    extractor: TableExtractor,
    cascade: &'a CascadeClassifier,
}

impl<'a> DocumentPipeline<'a> {
    pub fn new(extractor: TableExtractor, cascade: &'a CascadeClassifier) -> Self {
        DocumentPipeline { extractor, cascade }
    }

    /// Extracts and classifies every table row of the document. `period`
    /// is attached to all items; per-column periods belong to the
    /// template side, not the flat source side.
    pub fn process(&self, path: &Path, period: Option<&str>) -> Result<DocumentExtraction> {
        let extraction = self.extractor.detect_tables(path)?;
        let mut items = Vec::new();
        for table in &extraction.tables {
            items.extend(self.items_from_table(table, period));
        }

        info!(
            "processed '{}': {} tables on {} pages, {} line items ({} classified)",
            path.display(),
            extraction.tables.len(),
            extraction.page_count,
            items.len(),
            items.iter().filter(|i| i.item_id.is_some()).count()
        );

        Ok(DocumentExtraction { extraction, items })
    }

    /// One item per row that has a label and at least one parsed number.
    /// The first numeric cell wins; later columns are earlier periods.
    fn items_from_table(
        &self,
        table: &ExtractedTable,
        period: Option<&str>,
    ) -> Vec<ExtractedItem> {
        let mut items = Vec::new();

        for row in &table.rows {
            let label = row
                .iter()
                .take_while(|c| !c.is_numeric())
                .map(|c| c.text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if label.is_empty() {
                continue;
            }
            let Some(value_cell) = row.iter().find(|c| c.is_numeric()) else {
                continue;
            };

            let result = self.cascade.classify(&label);
            let is_calculated = result
                .item_id
                .as_deref()
                .map(|id| self.cascade.ontology().is_calculated(id))
                .unwrap_or(false);

            items.push(ExtractedItem {
                label,
                item_id: result.item_id,
                confidence: result.confidence,
                value: value_cell.parsed.value,
                period: period.map(String::from),
                source_page: Some(table.page as u32),
                is_calculated,
            });
        }

        items
    }
}
