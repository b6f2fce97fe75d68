//! Greedy assignment of extracted line items to template cells.
//!
//! Every source/target pair gets a composite score from four weighted
//! components; pairs above the floor are sorted and assigned greedily so
//! each source and each target is used at most once. Anything left over,
//! or assigned with middling confidence, surfaces as a conflict for
//! review instead of being silently dropped, and the accepted values are
//! run through the accounting validators as a final consistency gate.

pub mod validators;

use crate::classify::CascadeClassifier;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub use validators::{validate_statement, Finding, FindingSeverity};

/// Component weights. They sum to 1.0.
const WEIGHT_ONTOLOGY: f64 = 0.50;
const WEIGHT_LABEL: f64 = 0.20;
const WEIGHT_PERIOD: f64 = 0.20;
const WEIGHT_VALUE: f64 = 0.10;

/// Pairs scoring below this are never proposed.
const SCORE_FLOOR: f64 = 0.30;
/// At or above this, an assignment is applied without review.
const AUTO_THRESHOLD: f64 = 0.70;

/// A line item recovered from a source document, already classified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub label: String,
    pub item_id: Option<String>,
    /// Classification confidence for `item_id`.
    pub confidence: f64,
    pub value: Option<f64>,
    pub period: Option<String>,
    pub source_page: Option<u32>,
    /// Derived in the taxonomy (subtotals); excluded from sums.
    pub is_calculated: bool,
}

/// A writable cell in the analyzed template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateTarget {
    pub sheet: String,
    pub row: u32,
    pub col: u32,
    /// Qualified address, e.g. `"Model!B3"`.
    pub address: String,
    pub label: String,
    pub item_id: Option<String>,
    pub period: Option<String>,
    /// False when the cell carries a formula and must not be overwritten.
    pub is_input: bool,
    pub existing_value: Option<f64>,
}

/// One scored source/target pair with its component breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingCandidate {
    pub source_index: usize,
    pub target_index: usize,
    pub score: f64,
    pub ontology_score: f64,
    pub label_score: f64,
    pub period_score: f64,
    pub value_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub source: ExtractedItem,
    pub target: TemplateTarget,
    pub score: f64,
    /// Below the auto threshold the assignment needs a human look.
    pub needs_review: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    UnmappedSource,
    UnmappedTarget,
    LowConfidenceAssignment,
    /// An accounting check failed over the accepted values.
    ValidationFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub description: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingStatistics {
    pub sources: usize,
    pub targets: usize,
    pub assignments: usize,
    pub auto_applied: usize,
    pub needs_review: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingResult {
    pub assignments: Vec<Assignment>,
    pub conflicts: Vec<Conflict>,
    pub statistics: MappingStatistics,
}

/// Scores and assigns sources to targets. Holds the cascade so label
/// agreement can be judged when taxonomy identities are missing.
pub struct MappingEngine<'a> {
    cascade: &'a CascadeClassifier,
}

impl<'a> MappingEngine<'a> {
    pub fn new(cascade: &'a CascadeClassifier) -> Self {
        MappingEngine { cascade }
    }

    /// Maps `sources` onto `targets` for one period. Inputs are not
    /// mutated and the result is deterministic for identical inputs.
    pub fn map(
        &self,
        sources: &[ExtractedItem],
        targets: &[TemplateTarget],
        period: Option<&str>,
    ) -> MappingResult {
        let eligible: Vec<usize> = targets
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_input)
            .filter(|(_, t)| match (period, &t.period) {
                (Some(wanted), Some(have)) => wanted == have,
                _ => true,
            })
            .map(|(i, _)| i)
            .collect();

        let mut candidates = Vec::new();
        for (si, source) in sources.iter().enumerate() {
            for &ti in &eligible {
                if let Some(candidate) = self.score(si, source, ti, &targets[ti]) {
                    candidates.push(candidate);
                }
            }
        }

        // Best score first; index order breaks ties so the outcome never
        // depends on sort internals.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.source_index.cmp(&b.source_index))
                .then(a.target_index.cmp(&b.target_index))
        });

        let mut used_sources = HashSet::new();
        let mut used_targets = HashSet::new();
        let mut assignments = Vec::new();

        for candidate in &candidates {
            if used_sources.contains(&candidate.source_index)
                || used_targets.contains(&candidate.target_index)
            {
                continue;
            }
            used_sources.insert(candidate.source_index);
            used_targets.insert(candidate.target_index);
            debug!(
                "assigned '{}' -> {} (score {:.2}: ont {:.2}, label {:.2}, period {:.2}, value {:.2})",
                sources[candidate.source_index].label,
                targets[candidate.target_index].address,
                candidate.score,
                candidate.ontology_score,
                candidate.label_score,
                candidate.period_score,
                candidate.value_score
            );
            assignments.push(Assignment {
                source: sources[candidate.source_index].clone(),
                target: targets[candidate.target_index].clone(),
                score: candidate.score,
                needs_review: candidate.score < AUTO_THRESHOLD,
            });
        }

        let mut conflicts = self.collect_conflicts(sources, targets, &eligible, &assignments, &used_sources, &used_targets);
        conflicts.extend(self.validate_assignments(&assignments));

        let statistics = MappingStatistics {
            sources: sources.len(),
            targets: targets.len(),
            assignments: assignments.len(),
            auto_applied: assignments.iter().filter(|a| !a.needs_review).count(),
            needs_review: assignments.iter().filter(|a| a.needs_review).count(),
            conflicts: conflicts.len(),
        };

        info!(
            "mapping: {}/{} sources assigned, {} auto, {} for review, {} conflicts",
            statistics.assignments,
            statistics.sources,
            statistics.auto_applied,
            statistics.needs_review,
            statistics.conflicts
        );

        MappingResult {
            assignments,
            conflicts,
            statistics,
        }
    }

    fn score(
        &self,
        source_index: usize,
        source: &ExtractedItem,
        target_index: usize,
        target: &TemplateTarget,
    ) -> Option<MappingCandidate> {
        let ontology_score = self.ontology_agreement(source, target);

        // Label similarity only matters when taxonomy identity is weak;
        // otherwise it just restates the ontology component.
        let label_score = if ontology_score < 0.5 {
            self.label_agreement(source, target)
        } else {
            ontology_score
        };

        let period_score = match (&source.period, &target.period) {
            (Some(s), Some(t)) if s == t => 1.0,
            (Some(_), Some(_)) => 0.0,
            _ => 1.0,
        };

        let value_score = value_sanity(source, target);

        let score = WEIGHT_ONTOLOGY * ontology_score
            + WEIGHT_LABEL * label_score
            + WEIGHT_PERIOD * period_score
            + WEIGHT_VALUE * value_score;

        if score < SCORE_FLOOR {
            return None;
        }

        Some(MappingCandidate {
            source_index,
            target_index,
            score,
            ontology_score,
            label_score,
            period_score,
            value_score,
        })
    }

    /// Graded agreement between taxonomy identities: same item 1.0, same
    /// category 0.6, same statement 0.3, otherwise 0.0. Pairs without
    /// identities score 0.0 and lean on the label component instead.
    fn ontology_agreement(&self, source: &ExtractedItem, target: &TemplateTarget) -> f64 {
        let (Some(a), Some(b)) = (&source.item_id, &target.item_id) else {
            return 0.0;
        };
        if a == b {
            return 1.0;
        }
        let ontology = self.cascade.ontology();
        let (Some(item_a), Some(item_b)) = (ontology.get(a), ontology.get(b)) else {
            return 0.0;
        };
        if item_a.statement_type == item_b.statement_type && item_a.category == item_b.category {
            0.6
        } else if item_a.statement_type == item_b.statement_type {
            0.3
        } else {
            0.0
        }
    }

    fn label_agreement(&self, source: &ExtractedItem, target: &TemplateTarget) -> f64 {
        if source.label.eq_ignore_ascii_case(&target.label) {
            return 1.0;
        }
        let source_result = self.cascade.classify(&source.label);
        let target_result = self.cascade.classify(&target.label);
        match (&source_result.item_id, &target_result.item_id) {
            (Some(a), Some(b)) if a == b => {
                source_result.confidence.min(target_result.confidence)
            }
            _ => 0.0,
        }
    }

    fn collect_conflicts(
        &self,
        sources: &[ExtractedItem],
        targets: &[TemplateTarget],
        eligible: &[usize],
        assignments: &[Assignment],
        used_sources: &HashSet<usize>,
        used_targets: &HashSet<usize>,
    ) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        for (si, source) in sources.iter().enumerate() {
            if used_sources.contains(&si) {
                continue;
            }
            let suggestions = if source.item_id.is_some() {
                vec![format!(
                    "add a '{}' row to the template",
                    source.item_id.as_deref().unwrap_or_default()
                )]
            } else {
                vec![format!("classify '{}' manually", source.label)]
            };
            conflicts.push(Conflict {
                kind: ConflictKind::UnmappedSource,
                severity: ConflictSeverity::Low,
                description: format!(
                    "extracted item '{}' has no matching template cell",
                    source.label
                ),
                suggestions,
            });
        }

        for &ti in eligible {
            if used_targets.contains(&ti) {
                continue;
            }
            let target = &targets[ti];
            conflicts.push(Conflict {
                kind: ConflictKind::UnmappedTarget,
                severity: ConflictSeverity::High,
                description: format!(
                    "template cell {} ('{}') received no value",
                    target.address, target.label
                ),
                suggestions: vec![format!(
                    "check the source document for a '{}' line",
                    target.label
                )],
            });
        }

        for assignment in assignments {
            if assignment.needs_review {
                conflicts.push(Conflict {
                    kind: ConflictKind::LowConfidenceAssignment,
                    severity: ConflictSeverity::Medium,
                    description: format!(
                        "'{}' -> {} scored {:.2}, below the auto-apply threshold",
                        assignment.source.label, assignment.target.address, assignment.score
                    ),
                    suggestions: vec!["confirm or reassign manually".to_string()],
                });
            }
        }

        conflicts
    }

    /// Runs the accounting validators over the accepted values. Each failed
    /// check becomes a conflict; checks short of inputs stay findings only.
    fn validate_assignments(&self, assignments: &[Assignment]) -> Vec<Conflict> {
        let mut values: HashMap<String, f64> = HashMap::new();
        for assignment in assignments {
            let (Some(id), Some(value)) = (&assignment.source.item_id, assignment.source.value)
            else {
                continue;
            };
            // Assignments arrive best-score-first, so the first value per
            // taxonomy id wins.
            values.entry(id.clone()).or_insert(value);
        }
        if values.is_empty() {
            return Vec::new();
        }

        validators::validate_statement(self.cascade.ontology(), &values)
            .into_iter()
            .filter(|finding| finding.severity == FindingSeverity::Fail)
            .map(|finding| Conflict {
                kind: ConflictKind::ValidationFailure,
                severity: ConflictSeverity::High,
                description: finding.description,
                suggestions: vec![format!(
                    "re-check the values mapped into the '{}' check",
                    finding.check
                )],
            })
            .collect()
    }
}

/// Order-of-magnitude check against the cell's existing value. With no
/// prior value there is nothing to contradict, so the component is
/// neutral at 1.0.
fn value_sanity(source: &ExtractedItem, target: &TemplateTarget) -> f64 {
    let (Some(new), Some(old)) = (source.value, target.existing_value) else {
        return 1.0;
    };
    if old == 0.0 {
        return 1.0;
    }
    let ratio = (new / old).abs();
    if (0.1..=10.0).contains(&ratio) {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::OntologyIndex;
    use std::sync::Arc;

    fn source(label: &str, item_id: Option<&str>, value: f64) -> ExtractedItem {
        ExtractedItem {
            label: label.to_string(),
            item_id: item_id.map(String::from),
            confidence: if item_id.is_some() { 1.0 } else { 0.0 },
            value: Some(value),
            period: Some("2023".to_string()),
            source_page: Some(1),
            is_calculated: false,
        }
    }

    fn target(address: &str, label: &str, item_id: Option<&str>) -> TemplateTarget {
        TemplateTarget {
            sheet: "Model".to_string(),
            row: 0,
            col: 1,
            address: address.to_string(),
            label: label.to_string(),
            item_id: item_id.map(String::from),
            period: Some("2023".to_string()),
            is_input: true,
            existing_value: None,
        }
    }

    fn engine_cascade() -> CascadeClassifier {
        CascadeClassifier::new(Arc::new(OntologyIndex::builtin()))
    }

    #[test]
    fn test_perfect_matches_score_one() {
        let cascade = engine_cascade();
        let engine = MappingEngine::new(&cascade);

        let sources = vec![
            source("Revenue", Some("income_statement:revenue"), 1_000_000.0),
            source("Cost of Goods Sold", Some("income_statement:cost_of_goods_sold"), 400_000.0),
        ];
        let targets = vec![
            target("Model!B3", "Revenue", Some("income_statement:revenue")),
            target("Model!B4", "Cost of Goods Sold", Some("income_statement:cost_of_goods_sold")),
        ];

        let result = engine.map(&sources, &targets, Some("2023"));
        assert_eq!(result.assignments.len(), 2);
        assert!(result.conflicts.is_empty());
        for assignment in &result.assignments {
            assert!((assignment.score - 1.0).abs() < 1e-9);
            assert!(!assignment.needs_review);
        }
    }

    #[test]
    fn test_each_source_and_target_used_once() {
        let cascade = engine_cascade();
        let engine = MappingEngine::new(&cascade);

        // Two sources compete for one revenue cell.
        let sources = vec![
            source("Revenue", Some("income_statement:revenue"), 1_000_000.0),
            source("Total Revenue", Some("income_statement:revenue"), 990_000.0),
        ];
        let targets = vec![target("Model!B3", "Revenue", Some("income_statement:revenue"))];

        let result = engine.map(&sources, &targets, Some("2023"));
        assert_eq!(result.assignments.len(), 1);
        // Losing source surfaces as an unmapped-source conflict.
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].kind, ConflictKind::UnmappedSource);
        assert_eq!(result.conflicts[0].severity, ConflictSeverity::Low);
    }

    #[test]
    fn test_unfilled_input_target_is_high_severity() {
        let cascade = engine_cascade();
        let engine = MappingEngine::new(&cascade);

        let sources = vec![source("Revenue", Some("income_statement:revenue"), 1_000_000.0)];
        let targets = vec![
            target("Model!B3", "Revenue", Some("income_statement:revenue")),
            target("Model!B4", "Cost of Goods Sold", Some("income_statement:cost_of_goods_sold")),
        ];

        let result = engine.map(&sources, &targets, Some("2023"));
        assert_eq!(result.assignments.len(), 1);
        let unmapped: Vec<_> = result
            .conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::UnmappedTarget)
            .collect();
        assert_eq!(unmapped.len(), 1);
        assert_eq!(unmapped[0].severity, ConflictSeverity::High);
    }

    #[test]
    fn test_formula_cells_never_receive_values() {
        let cascade = engine_cascade();
        let engine = MappingEngine::new(&cascade);

        let sources = vec![source("Gross Profit", Some("income_statement:gross_profit"), 600_000.0)];
        let mut formula_target = target("Model!B5", "Gross Profit", Some("income_statement:gross_profit"));
        formula_target.is_input = false;

        let result = engine.map(&sources, &[formula_target], Some("2023"));
        assert!(result.assignments.is_empty());
        // The calculated cell is not an eligible target, so it does not
        // count as unmapped either.
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].kind, ConflictKind::UnmappedSource);
    }

    #[test]
    fn test_period_mismatch_filters_targets() {
        let cascade = engine_cascade();
        let engine = MappingEngine::new(&cascade);

        let sources = vec![source("Revenue", Some("income_statement:revenue"), 1_000_000.0)];
        let mut old_target = target("Model!C3", "Revenue", Some("income_statement:revenue"));
        old_target.period = Some("2022".to_string());

        let result = engine.map(&sources, &[old_target], Some("2023"));
        assert!(result.assignments.is_empty());
    }

    #[test]
    fn test_label_component_rescues_unclassified_pairs() {
        let cascade = engine_cascade();
        let engine = MappingEngine::new(&cascade);

        // Neither side carries a taxonomy id, but labels agree exactly.
        let sources = vec![source("Bespoke Adjustment", None, 5_000.0)];
        let targets = vec![target("Model!B9", "Bespoke Adjustment", None)];

        let result = engine.map(&sources, &targets, Some("2023"));
        assert_eq!(result.assignments.len(), 1);
        let assignment = &result.assignments[0];
        // 0.20 label + 0.20 period + 0.10 value = 0.50, below auto.
        assert!(assignment.needs_review);
        assert!(assignment.score >= SCORE_FLOOR);
        assert!(result
            .conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::LowConfidenceAssignment));
    }

    #[test]
    fn test_value_sanity_penalizes_magnitude_jumps() {
        let cascade = engine_cascade();
        let engine = MappingEngine::new(&cascade);

        let sources = vec![source("Revenue", Some("income_statement:revenue"), 1_000_000.0)];
        let mut t = target("Model!B3", "Revenue", Some("income_statement:revenue"));
        t.existing_value = Some(50.0);

        let result = engine.map(&sources, &targets_of(t), Some("2023"));
        assert_eq!(result.assignments.len(), 1);
        assert!((result.assignments[0].score - 0.90).abs() < 1e-9);
    }

    fn targets_of(t: TemplateTarget) -> Vec<TemplateTarget> {
        vec![t]
    }

    #[test]
    fn test_unbalanced_sheet_surfaces_validation_conflict() {
        let cascade = engine_cascade();
        let engine = MappingEngine::new(&cascade);

        // Three clean assignments, but assets != liabilities + equity.
        let sources = vec![
            source("Total Assets", Some("balance_sheet:total_assets"), 100.0),
            source("Total Liabilities", Some("balance_sheet:total_liabilities"), 60.0),
            source("Total Equity", Some("balance_sheet:total_equity"), 35.0),
        ];
        let targets = vec![
            target("Model!B10", "Total Assets", Some("balance_sheet:total_assets")),
            target("Model!B11", "Total Liabilities", Some("balance_sheet:total_liabilities")),
            target("Model!B12", "Total Equity", Some("balance_sheet:total_equity")),
        ];

        let result = engine.map(&sources, &targets, Some("2023"));
        assert_eq!(result.assignments.len(), 3);
        let failures: Vec<_> = result
            .conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::ValidationFailure)
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].severity, ConflictSeverity::High);
        assert_eq!(result.statistics.conflicts, result.conflicts.len());
    }

    #[test]
    fn test_balanced_sheet_passes_validation() {
        let cascade = engine_cascade();
        let engine = MappingEngine::new(&cascade);

        let sources = vec![
            source("Total Assets", Some("balance_sheet:total_assets"), 100.0),
            source("Total Liabilities", Some("balance_sheet:total_liabilities"), 60.0),
            source("Total Equity", Some("balance_sheet:total_equity"), 40.0),
        ];
        let targets = vec![
            target("Model!B10", "Total Assets", Some("balance_sheet:total_assets")),
            target("Model!B11", "Total Liabilities", Some("balance_sheet:total_liabilities")),
            target("Model!B12", "Total Equity", Some("balance_sheet:total_equity")),
        ];

        let result = engine.map(&sources, &targets, Some("2023"));
        assert_eq!(result.assignments.len(), 3);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn test_determinism() {
        let cascade = engine_cascade();
        let engine = MappingEngine::new(&cascade);

        let sources: Vec<_> = (0..5)
            .map(|i| source(&format!("Item {}", i), None, 100.0 * i as f64))
            .collect();
        let targets: Vec<_> = (0..5)
            .map(|i| target(&format!("Model!B{}", i + 2), &format!("Item {}", i), None))
            .collect();

        let first = engine.map(&sources, &targets, None);
        let second = engine.map(&sources, &targets, None);
        let keys = |r: &MappingResult| {
            r.assignments
                .iter()
                .map(|a| (a.source.label.clone(), a.target.address.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&first), keys(&second));
    }
}
