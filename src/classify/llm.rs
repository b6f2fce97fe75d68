//! LLM fallback tier.
//!
//! A schema-constrained classification call: the model must answer with one
//! of the taxonomy ids, a confidence, and a short justification. The tier is
//! advisory; the cascade caps its confidence below the rule tier's exact
//! matches. The bundled Gemini client lives behind the `llm` feature so the
//! core builds without an HTTP stack.

use crate::error::Result;
use crate::ontology::OntologyIndex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured answer the backend must produce.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LlmClassification {
    #[schemars(description = "The taxonomy item id. MUST be one of the ids listed in the prompt.")]
    pub item_id: String,

    #[schemars(description = "Confidence in the classification, 0.0 to 1.0")]
    pub confidence: f64,

    #[schemars(description = "One short sentence explaining the choice")]
    pub justification: String,
}

impl LlmClassification {
    pub fn json_schema() -> std::result::Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(schemars::schema_for!(LlmClassification))
    }
}

/// A structured-output classification backend. The only component of the
/// pipeline that performs network I/O; implementations carry their own
/// timeout and must never block the rule/embedding tiers.
pub trait LlmBackend: Send + Sync {
    fn classify(&self, text: &str, ontology: &OntologyIndex) -> Result<LlmClassification>;
}

/// Render the taxonomy as an id/label listing for the prompt.
pub fn taxonomy_listing(ontology: &OntologyIndex) -> String {
    let mut listing = String::new();
    for item in ontology.items() {
        listing.push_str(&format!("- {} ({})\n", item.id, item.label));
    }
    listing
}

#[cfg(feature = "llm")]
pub use gemini::GeminiBackend;

#[cfg(feature = "llm")]
mod gemini {
    use super::{taxonomy_listing, LlmBackend, LlmClassification};
    use crate::error::{Result, StatementMapperError};
    use crate::ontology::OntologyIndex;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

    const SYSTEM_PROMPT: &str = "You classify financial-statement line items against a fixed \
accounting taxonomy. Answer with the single best-matching taxonomy id, a confidence between \
0.0 and 1.0, and a one-sentence justification. If nothing fits, pick the closest id and \
report a low confidence. Return ONLY valid JSON matching the schema.";

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct GenerateContentRequest {
        contents: Vec<Content>,
        system_instruction: Content,
        generation_config: GenerationConfig,
    }

    #[derive(Serialize, Deserialize, Clone)]
    struct Content {
        role: String,
        parts: Vec<Part>,
    }

    #[derive(Serialize, Deserialize, Clone)]
    struct Part {
        text: String,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct GenerationConfig {
        response_mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_schema: Option<serde_json::Value>,
    }

    #[derive(Deserialize)]
    struct GenerateContentResponse {
        candidates: Option<Vec<ResponseCandidate>>,
    }

    #[derive(Deserialize)]
    struct ResponseCandidate {
        content: Content,
    }

    /// Blocking Gemini structured-output client with its own request
    /// timeout, so a slow model cannot stall the cascade indefinitely.
    pub struct GeminiBackend {
        client: reqwest::blocking::Client,
        api_key: String,
        model: String,
        base_url: String,
    }

    impl GeminiBackend {
        pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
            let client = reqwest::blocking::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .map_err(|e| StatementMapperError::LlmError(e.to_string()))?;
            Ok(Self {
                client,
                api_key: api_key.into(),
                model: model.into(),
                base_url: GEMINI_BASE_URL.to_string(),
            })
        }

        fn generate(&self, user_text: String) -> Result<String> {
            let url = format!(
                "{}/models/{}:generateContent?key={}",
                self.base_url, self.model, self.api_key
            );

            let payload = GenerateContentRequest {
                contents: vec![Content {
                    role: "user".to_string(),
                    parts: vec![Part { text: user_text }],
                }],
                system_instruction: Content {
                    role: "user".to_string(),
                    parts: vec![Part {
                        text: SYSTEM_PROMPT.to_string(),
                    }],
                },
                generation_config: GenerationConfig {
                    response_mime_type: "application/json".to_string(),
                    response_schema: LlmClassification::json_schema().ok(),
                },
            };

            let res = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .map_err(|e| StatementMapperError::LlmError(e.to_string()))?;

            let status = res.status();
            if !status.is_success() {
                let err_text = res.text().unwrap_or_default();
                return Err(StatementMapperError::LlmError(format!(
                    "Gemini API error (status {}): {}",
                    status, err_text
                )));
            }

            let body: GenerateContentResponse = res
                .json()
                .map_err(|e| StatementMapperError::LlmError(e.to_string()))?;

            body.candidates
                .and_then(|mut c| {
                    if c.is_empty() {
                        None
                    } else {
                        c.remove(0).content.parts.into_iter().next()
                    }
                })
                .map(|part| part.text)
                .ok_or_else(|| {
                    StatementMapperError::LlmError("no candidates returned".to_string())
                })
        }
    }

    impl LlmBackend for GeminiBackend {
        fn classify(&self, text: &str, ontology: &OntologyIndex) -> Result<LlmClassification> {
            let user_text = format!(
                "Classify this financial-statement line item label:\n\n\"{}\"\n\n\
                Allowed taxonomy ids:\n{}",
                text,
                taxonomy_listing(ontology)
            );

            let raw = self.generate(user_text)?;
            let cleaned = clean_json_output(&raw);
            serde_json::from_str(&cleaned)
                .map_err(|e| StatementMapperError::LlmError(format!("unparsable answer: {}", e)))
        }
    }

    fn clean_json_output(raw: &str) -> String {
        if let Some(start) = raw.find('{') {
            if let Some(end) = raw.rfind('}') {
                return raw[start..=end].to_string();
            }
        }
        raw.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{CascadeClassifier, MatchType};
    use std::sync::Arc;

    struct ConfidentMock;

    impl LlmBackend for ConfidentMock {
        fn classify(&self, _text: &str, _ontology: &OntologyIndex) -> Result<LlmClassification> {
            Ok(LlmClassification {
                item_id: "income_statement:revenue".to_string(),
                confidence: 1.0,
                justification: "mock".to_string(),
            })
        }
    }

    struct FailingMock;

    impl LlmBackend for FailingMock {
        fn classify(&self, _text: &str, _ontology: &OntologyIndex) -> Result<LlmClassification> {
            Err(crate::error::StatementMapperError::LlmError(
                "no key".to_string(),
            ))
        }
    }

    #[test]
    fn test_schema_generation() {
        let schema = LlmClassification::json_schema().unwrap();
        let rendered = schema.to_string();
        assert!(rendered.contains("item_id"));
        assert!(rendered.contains("confidence"));
        assert!(rendered.contains("justification"));
    }

    #[test]
    fn test_llm_confidence_is_capped() {
        let cascade = CascadeClassifier::new(Arc::new(OntologyIndex::builtin()))
            .with_llm_backend(Box::new(ConfidentMock));

        // Unknown label: rules miss, the mock claims 1.0, the cascade caps.
        let result = cascade.classify("zzqx flibber");
        assert_eq!(result.match_type, MatchType::Llm);
        assert!(result.confidence <= 0.9);
    }

    #[test]
    fn test_llm_failure_degrades_gracefully() {
        let cascade = CascadeClassifier::new(Arc::new(OntologyIndex::builtin()))
            .with_llm_backend(Box::new(FailingMock));

        let result = cascade.classify("zzqx flibber");
        assert_eq!(result.item_id, None);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_llm_never_outranks_exact_match() {
        let cascade = CascadeClassifier::new(Arc::new(OntologyIndex::builtin()))
            .with_llm_backend(Box::new(ConfidentMock));

        let result = cascade.classify("Total Assets");
        assert_eq!(result.match_type, MatchType::ExactLabel);
        assert_eq!(result.item_id.as_deref(), Some("balance_sheet:total_assets"));
    }
}
