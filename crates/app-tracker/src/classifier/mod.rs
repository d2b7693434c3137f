//! Two-stage status classification: LLM first, keyword heuristics as fallback.

pub mod heuristics;
pub mod llm;

use llm::{CompletionClient, LlmClassifier};
use tracker_types::{ClassificationResult, EmailRecord};

pub struct StatusClassifier<C> {
    llm: Option<LlmClassifier<C>>,
}

impl<C: CompletionClient> StatusClassifier<C> {
    pub fn new(llm: LlmClassifier<C>) -> Self {
        Self { llm: Some(llm) }
    }

    /// Classifier that never calls a model
    pub fn heuristic_only() -> Self {
        Self { llm: None }
    }

    /// Classify one email. Never fails: any LLM error degrades to heuristics,
    /// and company or role the model left out are filled in heuristically.
    pub async fn classify(&self, email: &EmailRecord) -> ClassificationResult {
        let Some(llm) = &self.llm else {
            return heuristics::classify(email);
        };

        match llm.classify(email).await {
            Ok(mut result) => {
                if result.company.is_none() {
                    result.company = heuristics::extract_company(email);
                }
                if result.role.is_none() {
                    result.role = heuristics::extract_role(&email.subject, &email.body_snippet);
                }
                result
            }
            Err(e) => {
                tracing::warn!(
                    "LLM classification failed for {}, using heuristics: {}",
                    email.message_id,
                    e
                );
                heuristics::classify(email)
            }
        }
    }
}
