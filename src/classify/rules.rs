//! Rule tier of the classification cascade.
//!
//! Deterministic lexical matching against the taxonomy, tried from the
//! strictest form down: exact label, exact alias, abbreviation expansion,
//! normalized (stopwords removed, words sorted), and finally ranked
//! substring/word-overlap partial matching.

use crate::classify::{Candidate, ClassificationResult, MatchType};
use crate::ontology::{OntologyIndex, OntologyItem, StatementType};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const EXACT_LABEL_CONFIDENCE: f64 = 1.0;
const EXACT_ALIAS_CONFIDENCE: f64 = 0.95;
const ABBREVIATION_CONFIDENCE: f64 = 0.92;
const NORMALIZED_CONFIDENCE: f64 = 0.88;
const PARTIAL_FLOOR: f64 = 0.5;
const PARTIAL_CEILING: f64 = 0.85;
const MAX_CANDIDATES: usize = 5;

const STOPWORDS: &[&str] = &[
    "the", "of", "and", "for", "to", "a", "an", "in", "from", "on",
];

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("cogs", "cost of goods sold"),
    ("cos", "cost of sales"),
    ("sga", "selling general and administrative expenses"),
    ("opex", "operating expenses"),
    ("capex", "capital expenditures"),
    ("ppe", "property plant and equipment"),
    ("ar", "accounts receivable"),
    ("ap", "accounts payable"),
    ("rd", "research and development"),
    ("da", "depreciation and amortization"),
    ("ebit", "operating income"),
    ("ebt", "income before taxes"),
    ("apic", "additional paid-in capital"),
    ("fy", "fiscal year"),
];

pub struct RuleClassifier {
    ontology: Arc<OntologyIndex>,
    /// Normalized label/alias form -> index into the ontology item list.
    normalized: HashMap<String, usize>,
    /// Content-word sets per item, over label and aliases.
    word_sets: Vec<HashSet<String>>,
    abbreviations: HashMap<String, String>,
}

impl RuleClassifier {
    pub fn new(ontology: Arc<OntologyIndex>) -> Self {
        let mut normalized = HashMap::new();
        let mut word_sets = Vec::with_capacity(ontology.len());

        for (idx, item) in ontology.items().iter().enumerate() {
            let mut words: HashSet<String> = HashSet::new();
            for surface in std::iter::once(item.label.as_str())
                .chain(item.aliases.iter().map(|a| a.as_str()))
            {
                let form = normalize(surface);
                if !form.is_empty() {
                    normalized.entry(form.clone()).or_insert(idx);
                }
                words.extend(form.split_whitespace().map(|w| w.to_string()));
            }
            word_sets.push(words);
        }

        let abbreviations = ABBREVIATIONS
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();

        Self {
            ontology,
            normalized,
            word_sets,
            abbreviations,
        }
    }

    /// Run all rule sub-tiers, returning the first hit. `section` restricts
    /// matching to items of one statement type when known.
    pub fn classify(&self, text: &str, section: Option<StatementType>) -> ClassificationResult {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ClassificationResult::no_match();
        }

        if let Some(item) = self
            .ontology
            .find_by_label(trimmed)
            .filter(|item| in_section(item, section))
        {
            return ClassificationResult::matched(item, EXACT_LABEL_CONFIDENCE, MatchType::ExactLabel);
        }

        if let Some(item) = self
            .ontology
            .find_by_alias(trimmed)
            .filter(|item| in_section(item, section))
        {
            return ClassificationResult::matched(item, EXACT_ALIAS_CONFIDENCE, MatchType::ExactAlias);
        }

        if let Some(result) = self.match_abbreviation(trimmed, section) {
            return result;
        }

        if let Some(result) = self.match_normalized(trimmed, section) {
            return result;
        }

        self.match_partial(trimmed, section)
    }

    fn match_abbreviation(
        &self,
        text: &str,
        section: Option<StatementType>,
    ) -> Option<ClassificationResult> {
        let key: String = text
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let expansion = self.abbreviations.get(&key)?;

        let item = self
            .ontology
            .find_by_label(expansion)
            .or_else(|| self.ontology.find_by_alias(expansion))
            .or_else(|| {
                self.normalized
                    .get(&normalize(expansion))
                    .map(|idx| &self.ontology.items()[*idx])
            })
            .filter(|item| in_section(item, section))?;

        Some(ClassificationResult::matched(
            item,
            ABBREVIATION_CONFIDENCE,
            MatchType::Abbreviation,
        ))
    }

    fn match_normalized(
        &self,
        text: &str,
        section: Option<StatementType>,
    ) -> Option<ClassificationResult> {
        let form = normalize(text);
        if form.is_empty() {
            return None;
        }
        let idx = *self.normalized.get(&form)?;
        let item = &self.ontology.items()[idx];
        if !in_section(item, section) {
            return None;
        }
        Some(ClassificationResult::matched(
            item,
            NORMALIZED_CONFIDENCE,
            MatchType::Normalized,
        ))
    }

    /// Substring/word-overlap scoring over every eligible item, ranked.
    /// Scores land in [0.5, 0.85]; anything weaker is reported as no match
    /// so the later tiers get their chance.
    fn match_partial(&self, text: &str, section: Option<StatementType>) -> ClassificationResult {
        let query_form = normalize(text);
        let query_words: HashSet<String> = query_form
            .split_whitespace()
            .map(|w| w.to_string())
            .collect();
        if query_words.is_empty() {
            return ClassificationResult::no_match();
        }

        let mut scored: Vec<(usize, f64)> = Vec::new();
        for (idx, item) in self.ontology.items().iter().enumerate() {
            if !in_section(item, section) {
                continue;
            }
            let words = &self.word_sets[idx];
            if words.is_empty() {
                continue;
            }

            let intersection = query_words.intersection(words).count();
            if intersection == 0 {
                continue;
            }
            let union = query_words.union(words).count();
            let mut overlap = intersection as f64 / union as f64;

            // Containment either way is stronger evidence than bare overlap.
            let label_form = normalize(&item.label);
            if !label_form.is_empty()
                && (query_form.contains(&label_form) || label_form.contains(&query_form))
            {
                overlap = overlap.max(0.8);
            }

            let score = PARTIAL_FLOOR + overlap * (PARTIAL_CEILING - PARTIAL_FLOOR);
            scored.push((idx, score));
        }

        if scored.is_empty() {
            return ClassificationResult::no_match();
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let candidates: Vec<Candidate> = scored
            .iter()
            .take(MAX_CANDIDATES)
            .map(|(idx, score)| {
                let item = &self.ontology.items()[*idx];
                Candidate {
                    item_id: item.id.clone(),
                    label: item.label.clone(),
                    score: *score,
                }
            })
            .collect();

        let best = &self.ontology.items()[scored[0].0];
        let mut result = ClassificationResult::matched(best, scored[0].1, MatchType::Partial);
        result.candidates = candidates;
        result
    }
}

fn in_section(item: &OntologyItem, section: Option<StatementType>) -> bool {
    section.is_none_or(|s| item.statement_type == s)
}

/// Lowercase, strip punctuation, drop stopwords, sort the remaining words.
pub fn normalize(text: &str) -> String {
    let mut words: Vec<String> = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|w| !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect();
    words.sort();
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RuleClassifier {
        RuleClassifier::new(Arc::new(OntologyIndex::builtin()))
    }

    #[test]
    fn test_exact_label_match() {
        let result = classifier().classify("Revenue", None);
        assert_eq!(result.item_id.as_deref(), Some("income_statement:revenue"));
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.match_type, MatchType::ExactLabel);
    }

    #[test]
    fn test_exact_alias_match() {
        let result = classifier().classify("Turnover", None);
        assert_eq!(result.item_id.as_deref(), Some("income_statement:revenue"));
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.match_type, MatchType::ExactAlias);
    }

    #[test]
    fn test_normalized_match() {
        // Word order and punctuation carry no meaning.
        let result = classifier().classify("Equivalents, Cash and Cash", None);
        assert_eq!(
            result.item_id.as_deref(),
            Some("balance_sheet:cash_and_equivalents")
        );
        assert_eq!(result.match_type, MatchType::Normalized);
    }

    #[test]
    fn test_partial_match_ranked() {
        let result = classifier().classify("Consolidated revenue from contracts", None);
        assert_eq!(result.match_type, MatchType::Partial);
        assert!(result.confidence >= 0.5 && result.confidence <= 0.85);
        assert!(!result.candidates.is_empty());
        assert_eq!(
            result.candidates[0].item_id,
            result.item_id.clone().unwrap()
        );
    }

    #[test]
    fn test_section_filter() {
        let result = classifier().classify("Revenue", Some(StatementType::BalanceSheet));
        assert_ne!(result.item_id.as_deref(), Some("income_statement:revenue"));
    }

    #[test]
    fn test_no_match() {
        let result = classifier().classify("zzqx flibber", None);
        assert_eq!(result.item_id, None);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.match_type, MatchType::NoMatch);
    }

    #[test]
    fn test_empty_input() {
        let result = classifier().classify("   ", None);
        assert_eq!(result.item_id, None);
        assert_eq!(result.confidence, 0.0);
    }
}
