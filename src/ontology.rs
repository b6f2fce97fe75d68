//! The standardized accounting taxonomy and its lookup index.
//!
//! A taxonomy definition is a JSON document grouping items by statement
//! type. Items are immutable after load; the index owns them and exposes
//! id/label/alias lookup for the classification cascade and the validators.

use crate::error::{Result, StatementMapperError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum StatementType {
    IncomeStatement,
    BalanceSheet,
    CashFlow,
}

impl StatementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::IncomeStatement => "income_statement",
            StatementType::BalanceSheet => "balance_sheet",
            StatementType::CashFlow => "cash_flow",
        }
    }
}

/// One standardized accounting concept, e.g. `income_statement:revenue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyItem {
    /// Namespaced id in the form `statement:item`.
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub category: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Signed-sum expression over other item ids, e.g.
    /// `"income_statement:revenue - income_statement:cost_of_goods_sold"`.
    #[serde(default)]
    pub formula: Option<String>,
    pub statement_type: StatementType,
}

/// On-disk shape of one item, before the owning statement type is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub category: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub formula: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementSection {
    pub statement_type: StatementType,
    pub items: Vec<ItemDefinition>,
}

/// On-disk shape of a taxonomy definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyDefinition {
    pub name: String,
    pub statements: Vec<StatementSection>,
}

/// A term of a parsed formula expression: the referenced item id and its
/// sign (+1.0 or -1.0).
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaTerm {
    pub id: String,
    pub sign: f64,
}

/// Read-only lookup index over a loaded taxonomy.
///
/// Built once at startup and safe to share across in-flight documents.
pub struct OntologyIndex {
    items: Vec<OntologyItem>,
    by_id: HashMap<String, usize>,
    by_label: HashMap<String, usize>,
    by_alias: HashMap<String, usize>,
    formulas: HashMap<String, Vec<FormulaTerm>>,
}

const BUILTIN_ONTOLOGY: &str = include_str!("../data/ontology.json");

impl OntologyIndex {
    /// The bundled default taxonomy covering the three core statements.
    pub fn builtin() -> Self {
        Self::from_json_str(BUILTIN_ONTOLOGY).expect("bundled ontology definition is valid")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let definition: OntologyDefinition = serde_json::from_str(raw)?;
        Self::from_definition(definition)
    }

    pub fn from_definition(definition: OntologyDefinition) -> Result<Self> {
        let mut items = Vec::new();
        for section in definition.statements {
            for def in section.items {
                items.push(OntologyItem {
                    id: def.id,
                    label: def.label,
                    aliases: def.aliases,
                    category: def.category,
                    parent: def.parent,
                    formula: def.formula,
                    statement_type: section.statement_type,
                });
            }
        }
        if items.is_empty() {
            return Err(StatementMapperError::InvalidOntology(
                "taxonomy contains no items".to_string(),
            ));
        }

        let mut by_id = HashMap::new();
        let mut by_label = HashMap::new();
        let mut by_alias = HashMap::new();
        for (idx, item) in items.iter().enumerate() {
            if by_id.insert(item.id.clone(), idx).is_some() {
                return Err(StatementMapperError::InvalidOntology(format!(
                    "duplicate item id '{}'",
                    item.id
                )));
            }
            by_label.insert(item.label.to_lowercase(), idx);
            for alias in &item.aliases {
                by_alias.entry(alias.to_lowercase()).or_insert(idx);
            }
        }

        let mut formulas = HashMap::new();
        for item in &items {
            if let Some(expr) = &item.formula {
                let terms = parse_formula(expr)?;
                for term in &terms {
                    if !by_id.contains_key(&term.id) {
                        return Err(StatementMapperError::InvalidOntology(format!(
                            "formula on '{}' references unknown item '{}'",
                            item.id, term.id
                        )));
                    }
                }
                formulas.insert(item.id.clone(), terms);
            }
        }

        Ok(Self {
            items,
            by_id,
            by_label,
            by_alias,
            formulas,
        })
    }

    pub fn get(&self, id: &str) -> Option<&OntologyItem> {
        self.by_id.get(id).map(|idx| &self.items[*idx])
    }

    /// Exact label lookup, case-insensitive.
    pub fn find_by_label(&self, label: &str) -> Option<&OntologyItem> {
        self.by_label
            .get(&label.trim().to_lowercase())
            .map(|idx| &self.items[*idx])
    }

    /// Exact alias lookup, case-insensitive.
    pub fn find_by_alias(&self, alias: &str) -> Option<&OntologyItem> {
        self.by_alias
            .get(&alias.trim().to_lowercase())
            .map(|idx| &self.items[*idx])
    }

    pub fn items(&self) -> &[OntologyItem] {
        &self.items
    }

    pub fn items_for_statement(
        &self,
        statement_type: StatementType,
    ) -> impl Iterator<Item = &OntologyItem> {
        self.items
            .iter()
            .filter(move |item| item.statement_type == statement_type)
    }

    /// Parsed formula terms for a calculated item, if it carries a formula.
    pub fn formula_terms(&self, id: &str) -> Option<&[FormulaTerm]> {
        self.formulas.get(id).map(|terms| terms.as_slice())
    }

    /// Whether the item derives its value from other items.
    pub fn is_calculated(&self, id: &str) -> bool {
        self.formulas.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Parse a signed-sum expression like `"a + b - c"` into terms. The first
/// term is positive unless explicitly negated.
fn parse_formula(expr: &str) -> Result<Vec<FormulaTerm>> {
    fn push_term(expr: &str, terms: &mut Vec<FormulaTerm>, id: &str, sign: f64) -> Result<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(StatementMapperError::InvalidOntology(format!(
                "malformed formula expression '{}'",
                expr
            )));
        }
        terms.push(FormulaTerm {
            id: id.to_string(),
            sign,
        });
        Ok(())
    }

    let mut terms = Vec::new();
    let mut sign = 1.0;
    let mut current = String::new();

    for c in expr.chars() {
        match c {
            '+' => {
                push_term(expr, &mut terms, &current, sign)?;
                current.clear();
                sign = 1.0;
            }
            '-' => {
                if current.trim().is_empty() && terms.is_empty() {
                    sign = -1.0;
                } else {
                    push_term(expr, &mut terms, &current, sign)?;
                    current.clear();
                    sign = -1.0;
                }
            }
            _ => current.push(c),
        }
    }
    push_term(expr, &mut terms, &current, sign)?;
    Ok(terms)
}
