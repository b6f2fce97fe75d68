//! Accounting consistency checks over a set of mapped values.
//!
//! Validators are pure functions over an `item_id -> value` map: they
//! re-derive each calculated taxonomy item from its formula terms and
//! compare against the mapped value, plus the structural balance-sheet
//! identity. A missing input is reported as "cannot validate" rather
//! than a failure, since absence of evidence is not a contradiction.

use crate::ontology::OntologyIndex;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Absolute tolerance for money comparisons.
pub const TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingSeverity {
    /// Checked and consistent.
    Pass,
    /// Could not be checked for lack of inputs.
    Incomplete,
    /// Checked and inconsistent.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub check: String,
    pub severity: FindingSeverity,
    pub description: String,
    /// Signed difference (actual minus expected) for failed checks.
    pub difference: Option<f64>,
}

impl Finding {
    fn pass(check: &str, description: String) -> Self {
        Finding {
            check: check.to_string(),
            severity: FindingSeverity::Pass,
            description,
            difference: None,
        }
    }

    fn incomplete(check: &str, description: String) -> Self {
        Finding {
            check: check.to_string(),
            severity: FindingSeverity::Incomplete,
            description,
            difference: None,
        }
    }

    fn fail(check: &str, description: String, difference: f64) -> Self {
        Finding {
            check: check.to_string(),
            severity: FindingSeverity::Fail,
            description,
            difference: Some(difference),
        }
    }
}

/// Runs every applicable check against the mapped values.
pub fn validate_statement(
    ontology: &OntologyIndex,
    values: &HashMap<String, f64>,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    findings.extend(check_accounting_equation(values));
    for item in ontology.items() {
        if let Some(finding) = check_formula(ontology, values, &item.id) {
            findings.push(finding);
        }
    }

    let failed = findings
        .iter()
        .filter(|f| f.severity == FindingSeverity::Fail)
        .count();
    debug!(
        "validation: {} findings, {} failed",
        findings.len(),
        failed
    );

    findings
}

pub fn has_failures(findings: &[Finding]) -> bool {
    findings.iter().any(|f| f.severity == FindingSeverity::Fail)
}

/// Assets = Liabilities + Equity, within tolerance.
fn check_accounting_equation(values: &HashMap<String, f64>) -> Option<Finding> {
    const CHECK: &str = "accounting_equation";
    let assets = values.get("balance_sheet:total_assets");
    let liabilities = values.get("balance_sheet:total_liabilities");
    let equity = values.get("balance_sheet:total_equity");

    // Only relevant once any balance-sheet total is present.
    if assets.is_none() && liabilities.is_none() && equity.is_none() {
        return None;
    }
    let (Some(assets), Some(liabilities), Some(equity)) = (assets, liabilities, equity) else {
        return Some(Finding::incomplete(
            CHECK,
            "cannot validate assets = liabilities + equity: a total is missing".to_string(),
        ));
    };

    let difference = assets - (liabilities + equity);
    if difference.abs() <= TOLERANCE {
        Some(Finding::pass(
            CHECK,
            format!("assets {:.2} = liabilities + equity", assets),
        ))
    } else {
        Some(Finding::fail(
            CHECK,
            format!(
                "assets {:.2} differ from liabilities + equity {:.2}",
                assets,
                liabilities + equity
            ),
            difference,
        ))
    }
}

/// Re-derives one calculated item from its signed formula terms.
fn check_formula(
    ontology: &OntologyIndex,
    values: &HashMap<String, f64>,
    item_id: &str,
) -> Option<Finding> {
    let terms = ontology.formula_terms(item_id)?;
    let actual = *values.get(item_id)?;

    let mut expected = 0.0;
    for term in terms {
        let Some(value) = values.get(&term.id) else {
            return Some(Finding::incomplete(
                item_id,
                format!("cannot validate {}: '{}' is unmapped", item_id, term.id),
            ));
        };
        expected += term.sign * value;
    }

    let difference = actual - expected;
    if difference.abs() <= TOLERANCE {
        Some(Finding::pass(
            item_id,
            format!("{} = {:.2} matches its components", item_id, actual),
        ))
    } else {
        Some(Finding::fail(
            item_id,
            format!(
                "{} is {:.2} but its components sum to {:.2}",
                item_id, actual, expected
            ),
            difference,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::OntologyIndex;

    fn values(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn test_gross_profit_formula_passes() {
        let ontology = OntologyIndex::builtin();
        let findings = validate_statement(
            &ontology,
            &values(&[
                ("income_statement:revenue", 1_000_000.0),
                ("income_statement:cost_of_goods_sold", 400_000.0),
                ("income_statement:gross_profit", 600_000.0),
            ]),
        );
        let gp = findings
            .iter()
            .find(|f| f.check == "income_statement:gross_profit")
            .unwrap();
        assert_eq!(gp.severity, FindingSeverity::Pass);
        assert!(!has_failures(&findings));
    }

    #[test]
    fn test_formula_mismatch_reports_difference() {
        let ontology = OntologyIndex::builtin();
        let findings = validate_statement(
            &ontology,
            &values(&[
                ("income_statement:revenue", 100.0),
                ("income_statement:cost_of_goods_sold", 35.0),
                ("income_statement:gross_profit", 60.0),
            ]),
        );
        let gp = findings
            .iter()
            .find(|f| f.check == "income_statement:gross_profit")
            .unwrap();
        assert_eq!(gp.severity, FindingSeverity::Fail);
        assert!((gp.difference.unwrap() - (-5.0)).abs() < 1e-9);
        assert!(has_failures(&findings));
    }

    #[test]
    fn test_accounting_equation() {
        let ontology = OntologyIndex::builtin();

        let balanced = validate_statement(
            &ontology,
            &values(&[
                ("balance_sheet:total_assets", 100.0),
                ("balance_sheet:total_liabilities", 60.0),
                ("balance_sheet:total_equity", 40.0),
            ]),
        );
        let eq = balanced
            .iter()
            .find(|f| f.check == "accounting_equation")
            .unwrap();
        assert_eq!(eq.severity, FindingSeverity::Pass);

        let broken = validate_statement(
            &ontology,
            &values(&[
                ("balance_sheet:total_assets", 100.0),
                ("balance_sheet:total_liabilities", 60.0),
                ("balance_sheet:total_equity", 35.0),
            ]),
        );
        let eq = broken
            .iter()
            .find(|f| f.check == "accounting_equation")
            .unwrap();
        assert_eq!(eq.severity, FindingSeverity::Fail);
        assert!((eq.difference.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_inputs_are_incomplete_not_failed() {
        let ontology = OntologyIndex::builtin();
        let findings = validate_statement(
            &ontology,
            &values(&[
                ("income_statement:revenue", 1_000_000.0),
                ("income_statement:gross_profit", 600_000.0),
            ]),
        );
        let gp = findings
            .iter()
            .find(|f| f.check == "income_statement:gross_profit")
            .unwrap();
        assert_eq!(gp.severity, FindingSeverity::Incomplete);
        assert!(!has_failures(&findings));
    }

    #[test]
    fn test_tolerance_absorbs_rounding() {
        let ontology = OntologyIndex::builtin();
        let findings = validate_statement(
            &ontology,
            &values(&[
                ("income_statement:revenue", 100.005),
                ("income_statement:cost_of_goods_sold", 40.0),
                ("income_statement:gross_profit", 60.0),
            ]),
        );
        let gp = findings
            .iter()
            .find(|f| f.check == "income_statement:gross_profit")
            .unwrap();
        assert_eq!(gp.severity, FindingSeverity::Pass);
    }
}
