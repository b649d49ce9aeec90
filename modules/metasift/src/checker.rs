use std::sync::Arc;

use tracing::debug;

use metasift_common::{CheckVerdict, ExtractionResult, MetaSiftError};

use crate::oracle::{Oracle, OracleRequest};
use crate::prompts::PromptSet;
use crate::shape::{parse_verdict, rubric_schema};

/// Scores an [`ExtractionResult`] against the rubric and decides accept/reject.
pub struct Checker {
    oracle: Arc<dyn Oracle>,
    prompts: Arc<PromptSet>,
    threshold: u8,
}

impl Checker {
    pub fn new(oracle: Arc<dyn Oracle>, prompts: Arc<PromptSet>, threshold: u8) -> Self {
        Self {
            oracle,
            prompts,
            threshold,
        }
    }

    pub async fn check(&self, result: &ExtractionResult) -> Result<CheckVerdict, MetaSiftError> {
        let (schema_name, schema) = rubric_schema();
        let request = OracleRequest::new(
            "check",
            self.prompts.check_system(),
            self.prompts.check_query(result),
        )
        .temperature(0.0)
        .schema(schema_name, schema);

        let responses = self
            .oracle
            .complete(&request)
            .await
            .map_err(|e| MetaSiftError::Check(format!("{e:#}")))?;
        let raw = responses
            .first()
            .ok_or_else(|| MetaSiftError::Check("no completion returned".into()))?;

        let verdict = parse_verdict(raw, self.threshold)?;
        debug!(
            overall = verdict.overall_score,
            accuracy = verdict.data_accuracy,
            consistency = verdict.semantic_consistency,
            completeness = verdict.data_completeness,
            decision = ?verdict.decision,
            "Check verdict"
        );
        Ok(verdict)
    }
}
