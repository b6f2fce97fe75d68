//! Classification of line-item labels against the accounting taxonomy.
//!
//! Three tiers compose into one cascading classifier: deterministic lexical
//! rules, embedding cosine-similarity, and an advisory LLM fallback. Each
//! tier only runs when the previous one failed to clear its confidence
//! gate, and every tier degrades gracefully when its backend is absent.

pub mod embedding;
pub mod llm;
pub mod rules;

use crate::ontology::{OntologyIndex, OntologyItem, StatementType};
use embedding::{EmbeddingBackend, EmbeddingClassifier};
use llm::LlmBackend;
use log::{debug, warn};
use rules::RuleClassifier;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Which cascade tier produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    ExactLabel,
    ExactAlias,
    Abbreviation,
    Normalized,
    Partial,
    Embedding,
    Llm,
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub item_id: String,
    pub label: String,
    pub score: f64,
}

/// Outcome of one classification call. "No match" is data, not an error:
/// `item_id` is `None` and `confidence` is 0.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub item_id: Option<String>,
    pub label: Option<String>,
    pub confidence: f64,
    pub match_type: MatchType,
    /// Ranked alternatives, best first. Contains the winner when present.
    pub candidates: Vec<Candidate>,
}

impl ClassificationResult {
    pub fn no_match() -> Self {
        Self {
            item_id: None,
            label: None,
            confidence: 0.0,
            match_type: MatchType::NoMatch,
            candidates: Vec::new(),
        }
    }

    pub(crate) fn matched(item: &OntologyItem, confidence: f64, match_type: MatchType) -> Self {
        Self {
            item_id: Some(item.id.clone()),
            label: Some(item.label.clone()),
            confidence,
            match_type,
            candidates: vec![Candidate {
                item_id: item.id.clone(),
                label: item.label.clone(),
                score: confidence,
            }],
        }
    }

    pub fn is_match(&self) -> bool {
        self.item_id.is_some()
    }
}

/// Per-tier hit counts, captured with [`CascadeClassifier::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeStats {
    pub total_calls: u64,
    pub rule_hits: u64,
    pub embedding_hits: u64,
    pub llm_hits: u64,
    pub no_match: u64,
}

#[derive(Default)]
struct Counters {
    total_calls: AtomicU64,
    rule_hits: AtomicU64,
    embedding_hits: AtomicU64,
    llm_hits: AtomicU64,
    no_match: AtomicU64,
}

/// Rule confidence at or above this ends the cascade immediately.
const RULE_SHORT_CIRCUIT: f64 = 0.9;
/// Embedding similarity accepted outright.
const EMBEDDING_ACCEPT: f64 = 0.8;
/// Embedding similarity carried forward as a fallback candidate.
const EMBEDDING_FALLBACK: f64 = 0.7;
/// The embedding tier never reports certainty.
const EMBEDDING_CEILING: f64 = 0.99;
/// Below this the LLM tier is consulted, when configured.
const LLM_TRIGGER: f64 = 0.7;
/// LLM results are advisory and never outrank exact matches.
const LLM_CEILING: f64 = 0.9;

/// The three-tier cascading classifier.
///
/// Construct once per process with the loaded ontology; safe to share
/// across in-flight documents (all caches are read-only after build).
pub struct CascadeClassifier {
    ontology: Arc<OntologyIndex>,
    rules: RuleClassifier,
    embedding: Option<EmbeddingClassifier>,
    llm: Option<Box<dyn LlmBackend>>,
    counters: Counters,
}

impl CascadeClassifier {
    /// Rule tier only. Embedding and LLM tiers are attached with the
    /// `with_*` builders.
    pub fn new(ontology: Arc<OntologyIndex>) -> Self {
        let rules = RuleClassifier::new(Arc::clone(&ontology));
        Self {
            ontology,
            rules,
            embedding: None,
            llm: None,
            counters: Counters::default(),
        }
    }

    /// Attach an embedding backend. Item/alias vectors are precomputed
    /// here, once; a backend failure during precompute disables the tier
    /// rather than failing construction.
    pub fn with_embedding_backend(mut self, backend: Box<dyn EmbeddingBackend>) -> Self {
        match EmbeddingClassifier::new(&self.ontology, backend) {
            Ok(classifier) => self.embedding = Some(classifier),
            Err(e) => warn!("embedding tier disabled: {}", e),
        }
        self
    }

    pub fn with_llm_backend(mut self, backend: Box<dyn LlmBackend>) -> Self {
        self.llm = Some(backend);
        self
    }

    pub fn ontology(&self) -> &OntologyIndex {
        &self.ontology
    }

    pub fn classify(&self, text: &str) -> ClassificationResult {
        self.classify_in_section(text, None)
    }

    /// Classify with a statement-type context, as the spreadsheet aligner
    /// supplies for label cells inside an inferred section.
    pub fn classify_in_section(
        &self,
        text: &str,
        section: Option<StatementType>,
    ) -> ClassificationResult {
        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);

        if text.trim().is_empty() {
            self.counters.no_match.fetch_add(1, Ordering::Relaxed);
            return ClassificationResult::no_match();
        }

        let rule_result = self.rules.classify(text, section);
        if rule_result.confidence >= RULE_SHORT_CIRCUIT {
            self.counters.rule_hits.fetch_add(1, Ordering::Relaxed);
            return rule_result;
        }

        let mut best = rule_result;

        if let Some(embedding) = &self.embedding {
            match embedding.best_matches(text, section, 3) {
                Ok(matches) => {
                    if let Some(top) = matches.first() {
                        let similarity = top.score.min(EMBEDDING_CEILING);
                        if similarity >= EMBEDDING_ACCEPT {
                            self.counters.embedding_hits.fetch_add(1, Ordering::Relaxed);
                            return self.embedding_result(similarity, matches);
                        }
                        if similarity >= EMBEDDING_FALLBACK && similarity > best.confidence {
                            best = self.embedding_result(similarity, matches);
                        }
                    }
                }
                Err(e) => warn!("embedding tier unavailable, skipping: {}", e),
            }
        }

        if best.confidence < LLM_TRIGGER {
            if let Some(llm) = &self.llm {
                match llm.classify(text, &self.ontology) {
                    Ok(answer) => {
                        if let Some(item) = self
                            .ontology
                            .get(&answer.item_id)
                            .filter(|item| section.is_none() || Some(item.statement_type) == section)
                        {
                            let confidence = answer.confidence.clamp(0.0, LLM_CEILING);
                            if confidence > best.confidence {
                                debug!(
                                    "llm tier classified '{}' as {} ({})",
                                    text, item.id, answer.justification
                                );
                                self.counters.llm_hits.fetch_add(1, Ordering::Relaxed);
                                return ClassificationResult::matched(
                                    item,
                                    confidence,
                                    MatchType::Llm,
                                );
                            }
                        }
                    }
                    Err(e) => warn!("llm tier unavailable, skipping: {}", e),
                }
            }
        }

        if best.is_match() {
            match best.match_type {
                MatchType::Embedding => {
                    self.counters.embedding_hits.fetch_add(1, Ordering::Relaxed)
                }
                _ => self.counters.rule_hits.fetch_add(1, Ordering::Relaxed),
            };
        } else {
            self.counters.no_match.fetch_add(1, Ordering::Relaxed);
        }
        best
    }

    /// Order-preserving batch classification. A single item failing to
    /// match never short-circuits its siblings.
    pub fn classify_batch<S: AsRef<str>>(&self, texts: &[S]) -> Vec<ClassificationResult> {
        texts
            .iter()
            .map(|text| self.classify(text.as_ref()))
            .collect()
    }

    fn embedding_result(&self, similarity: f64, matches: Vec<Candidate>) -> ClassificationResult {
        let top = &matches[0];
        let mut result = match self.ontology.get(&top.item_id) {
            Some(item) => ClassificationResult::matched(item, similarity, MatchType::Embedding),
            None => ClassificationResult::no_match(),
        };
        result.candidates = matches
            .into_iter()
            .map(|mut c| {
                c.score = c.score.min(EMBEDDING_CEILING);
                c
            })
            .collect();
        result
    }

    pub fn stats(&self) -> CascadeStats {
        CascadeStats {
            total_calls: self.counters.total_calls.load(Ordering::Relaxed),
            rule_hits: self.counters.rule_hits.load(Ordering::Relaxed),
            embedding_hits: self.counters.embedding_hits.load(Ordering::Relaxed),
            llm_hits: self.counters.llm_hits.load(Ordering::Relaxed),
            no_match: self.counters.no_match.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.total_calls.store(0, Ordering::Relaxed);
        self.counters.rule_hits.store(0, Ordering::Relaxed);
        self.counters.embedding_hits.store(0, Ordering::Relaxed);
        self.counters.llm_hits.store(0, Ordering::Relaxed);
        self.counters.no_match.store(0, Ordering::Relaxed);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::HistogramBackend;
    use super::*;

    fn rule_only() -> CascadeClassifier {
        CascadeClassifier::new(Arc::new(OntologyIndex::builtin()))
    }

    #[test]
    fn test_exact_label_law() {
        let cascade = rule_only();
        for item in cascade.ontology().items() {
            let result = cascade.classify(&item.label);
            assert_eq!(
                result.item_id.as_deref(),
                Some(item.id.as_str()),
                "label '{}' must classify to its own item",
                item.label
            );
            assert_eq!(result.confidence, 1.0);
        }
    }

    #[test]
    fn test_empty_is_no_match() {
        let cascade = rule_only();
        let result = cascade.classify("");
        assert_eq!(result.item_id, None);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.match_type, MatchType::NoMatch);
    }

    #[test]
    fn test_embedding_tier_caps_confidence() {
        let cascade = CascadeClassifier::new(Arc::new(OntologyIndex::builtin()))
            .with_embedding_backend(Box::new(HistogramBackend));

        // Nonsense that shares letters with nothing in particular: whatever
        // the embedding tier reports, it must stay below certainty.
        let result = cascade.classify("qqq zzz xxx");
        if result.match_type == MatchType::Embedding {
            assert!(result.confidence < 1.0);
        }
    }

    #[test]
    fn test_batch_preserves_order_and_isolation() {
        let cascade = rule_only();
        let results = cascade.classify_batch(&["Revenue", "zzqx flibber", "Total Assets"]);
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].item_id.as_deref(),
            Some("income_statement:revenue")
        );
        assert_eq!(results[1].item_id, None);
        assert_eq!(
            results[2].item_id.as_deref(),
            Some("balance_sheet:total_assets")
        );
    }

    #[test]
    fn test_stats_counters() {
        let cascade = rule_only();
        cascade.classify("Revenue");
        cascade.classify("zzqx flibber");

        let stats = cascade.stats();
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.rule_hits, 1);
        assert_eq!(stats.no_match, 1);

        cascade.reset_stats();
        assert_eq!(cascade.stats(), CascadeStats::default());
    }
}
