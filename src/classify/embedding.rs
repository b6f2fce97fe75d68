//! Embedding-similarity tier.
//!
//! The backend is dependency-injected; the crate ships no model of its
//! own. Vectors for every ontology label and alias are computed once at
//! construction and cached read-only, so a classify call costs one query
//! embedding plus a linear cosine scan.

use crate::classify::Candidate;
use crate::error::{Result, StatementMapperError};
use crate::ontology::{OntologyIndex, StatementType};

/// Text to fixed-length vector. Implementations must be safe to call from
/// multiple documents in flight at once.
pub trait EmbeddingBackend: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

struct CachedVector {
    item_id: String,
    label: String,
    statement_type: StatementType,
    vector: Vec<f32>,
}

pub struct EmbeddingClassifier {
    backend: Box<dyn EmbeddingBackend>,
    cache: Vec<CachedVector>,
}

impl EmbeddingClassifier {
    /// Precompute one vector per item label and per alias.
    pub fn new(ontology: &OntologyIndex, backend: Box<dyn EmbeddingBackend>) -> Result<Self> {
        let mut cache = Vec::new();
        for item in ontology.items() {
            for surface in
                std::iter::once(item.label.as_str()).chain(item.aliases.iter().map(|a| a.as_str()))
            {
                let vector = backend.embed(surface)?;
                if vector.len() != backend.dimension() {
                    return Err(StatementMapperError::EmbeddingError(format!(
                        "backend returned a {}-dimensional vector, expected {}",
                        vector.len(),
                        backend.dimension()
                    )));
                }
                cache.push(CachedVector {
                    item_id: item.id.clone(),
                    label: item.label.clone(),
                    statement_type: item.statement_type,
                    vector,
                });
            }
        }
        Ok(Self { backend, cache })
    }

    /// Top matches by cosine similarity, best first, one entry per item.
    pub fn best_matches(
        &self,
        text: &str,
        section: Option<StatementType>,
        top_n: usize,
    ) -> Result<Vec<Candidate>> {
        let query = self.backend.embed(text)?;

        let mut best_per_item: Vec<Candidate> = Vec::new();
        for cached in &self.cache {
            if let Some(s) = section {
                if cached.statement_type != s {
                    continue;
                }
            }
            let similarity = cosine_similarity(&query, &cached.vector);
            match best_per_item
                .iter_mut()
                .find(|c| c.item_id == cached.item_id)
            {
                Some(existing) => {
                    if similarity > existing.score {
                        existing.score = similarity;
                    }
                }
                None => best_per_item.push(Candidate {
                    item_id: cached.item_id.clone(),
                    label: cached.label.clone(),
                    score: similarity,
                }),
            }
        }

        best_per_item.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.item_id.cmp(&b.item_id))
        });
        best_per_item.truncate(top_n);
        Ok(best_per_item)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::test_support::HistogramBackend;

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0, 0.0, 1.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);

        let b = vec![0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);

        assert_eq!(cosine_similarity(&a, &[]), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_identical_text_is_top_match() {
        let ontology = OntologyIndex::builtin();
        let classifier =
            EmbeddingClassifier::new(&ontology, Box::new(HistogramBackend)).unwrap();

        let matches = classifier.best_matches("Gross Profit", None, 3).unwrap();
        assert_eq!(matches[0].item_id, "income_statement:gross_profit");
        assert!((matches[0].score - 1.0).abs() < 1e-6);
        assert!(matches.len() <= 3);
    }

    #[test]
    fn test_section_filter() {
        let ontology = OntologyIndex::builtin();
        let classifier =
            EmbeddingClassifier::new(&ontology, Box::new(HistogramBackend)).unwrap();

        let matches = classifier
            .best_matches("Revenue", Some(StatementType::CashFlow), 5)
            .unwrap();
        assert!(matches.iter().all(|c| c.item_id.starts_with("cash_flow:")));
    }
}
