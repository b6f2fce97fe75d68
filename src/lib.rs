//! # Statement Mapper
//!
//! A library for extracting financial-statement line items from source
//! documents, classifying them against a standard accounting taxonomy,
//! and mapping them into the input cells of a spreadsheet model.
//!
//! ## Core Concepts
//!
//! - **Extraction**: PDF pages run through a cascade of table detection
//!   strategies (text-line grouping, ruled grids, whitespace columns,
//!   optional OCR) that yields rows of parsed cells
//! - **Classification**: labels resolve to taxonomy items through a
//!   three-tier cascade (rules, then embeddings, then an LLM), each tier
//!   consulted only when the previous one is unsure
//! - **Structure Analysis**: workbooks are parsed into sections, period
//!   columns, and a formula dependency graph that separates input cells
//!   from calculated ones
//! - **Mapping**: a greedy engine assigns extracted items to template
//!   cells by a weighted composite score, surfacing everything it cannot
//!   place as reviewable conflicts
//! - **Validation**: mapped values are checked against the accounting
//!   equation and each calculated item's own formula
//!
//! ## Example
//!
//! ```rust,ignore
//! use statement_mapper::*;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let ontology = Arc::new(OntologyIndex::builtin());
//! let cascade = CascadeClassifier::new(Arc::clone(&ontology));
//!
//! let pipeline = DocumentPipeline::new(TableExtractor::new(), &cascade);
//! let document = pipeline.process(Path::new("10k.pdf"), Some("2023"))?;
//!
//! let analysis = SpreadsheetAnalyzer::new(&cascade).analyze(Path::new("model.xlsx"))?;
//! let targets = analysis.template_targets();
//!
//! let result = MappingEngine::new(&cascade).map(&document.items, &targets, Some("2023"));
//! for assignment in &result.assignments {
//!     println!("{} -> {}", assignment.source.label, assignment.target.address);
//! }
//! ```

pub mod batch;
pub mod classify;
pub mod error;
pub mod extract;
pub mod mapping;
pub mod numeric;
pub mod ontology;
pub mod pipeline;
pub mod spreadsheet;

pub use batch::{BatchProcessor, BatchReport, BatchSummary, CancellationToken};
pub use classify::{
    CascadeClassifier, CascadeStats, Candidate, ClassificationResult, MatchType,
};
pub use error::{Result, StatementMapperError};
pub use extract::{
    DetectionMethod, ExtractedCell, ExtractedTable, ExtractionResult, TableExtractor,
};
pub use mapping::{
    validate_statement, Assignment, Conflict, ConflictKind, ConflictSeverity, ExtractedItem,
    Finding, FindingSeverity, MappingEngine, MappingResult, MappingStatistics, TemplateTarget,
};
pub use numeric::{format_value, parse_numeric, ParsedNumber};
pub use ontology::{OntologyIndex, OntologyItem, StatementType};
pub use pipeline::{DocumentExtraction, DocumentPipeline};
pub use spreadsheet::{SpreadsheetAnalyzer, WorkbookAnalysis};

use std::path::Path;

/// One-call convenience: extract a document, analyze a workbook, and map
/// the former into the latter using the built-in taxonomy.
pub fn map_document_to_workbook(
    document: &Path,
    workbook: &Path,
    period: Option<&str>,
) -> Result<MappingResult> {
    let ontology = std::sync::Arc::new(OntologyIndex::builtin());
    let cascade = CascadeClassifier::new(ontology);

    let pipeline = DocumentPipeline::new(TableExtractor::new(), &cascade);
    let extraction = pipeline.process(document, period)?;

    let analysis = SpreadsheetAnalyzer::new(&cascade).analyze(workbook)?;
    let targets = analysis.template_targets();

    Ok(MappingEngine::new(&cascade).map(&extraction.items, &targets, period))
}
