//! Two-level extraction: a batched relevance filter followed by a sampled
//! transform into one integrated table.

use std::sync::Arc;

use tracing::{debug, info};

use metasift_common::{ExtractionResult, Fragment, FragmentKind, MetaSiftError};

use crate::markdown::{select_longest_fenced, split_table_explanation};
use crate::oracle::{Oracle, OracleRequest};
use crate::prompts::PromptSet;
use crate::settings::PipelineSettings;
use crate::shape::{parse_scores, relevance_schema};

/// A rejected table and the reviewer's suggestion, fed back into a transform.
#[derive(Debug, Clone, Copy)]
pub struct RepairHint<'a> {
    pub reference_answer: &'a str,
    pub suggestion: &'a str,
}

pub struct Extractor {
    oracle: Arc<dyn Oracle>,
    prompts: Arc<PromptSet>,
    settings: Arc<PipelineSettings>,
}

impl Extractor {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        prompts: Arc<PromptSet>,
        settings: Arc<PipelineSettings>,
    ) -> Self {
        Self {
            oracle,
            prompts,
            settings,
        }
    }

    /// Keep the fragments the oracle scores at or above the threshold, in
    /// their original order. No oracle call is made for an empty input.
    pub async fn filter(
        &self,
        fragments: &[Fragment],
        kind: FragmentKind,
    ) -> Result<Vec<Fragment>, MetaSiftError> {
        if fragments.is_empty() {
            return Ok(Vec::new());
        }

        let (schema_name, schema) = relevance_schema();
        let request = OracleRequest::new(
            "filter",
            self.prompts.filter_system(kind),
            self.prompts
                .filter_query(&self.settings.topic, fragments, kind),
        )
        .temperature(0.0)
        .schema(schema_name, schema);

        let responses = self.oracle.complete(&request).await?;
        let raw = responses
            .first()
            .ok_or_else(|| MetaSiftError::shape("filter", "no completion returned"))?;
        let scores = parse_scores(raw, fragments.len())?;

        let threshold = self.settings.extraction.first_level_threshold;
        let kept: Vec<Fragment> = fragments
            .iter()
            .zip(&scores)
            .filter(|(_, &score)| score >= threshold)
            .map(|(fragment, _)| fragment.clone())
            .collect();

        debug!(%kind, total = fragments.len(), kept = kept.len(), ?scores, "Relevance filter");
        Ok(kept)
    }

    /// Transform fragments into one integrated table.
    ///
    /// Without a hint, samples `extract_n` completions at `extract_temperature`
    /// and keeps the one with the longest fenced table. With a hint, asks for a
    /// single deterministic repair of the reference answer.
    pub async fn transform(
        &self,
        fragments: &[Fragment],
        kind: FragmentKind,
        hint: Option<RepairHint<'_>>,
    ) -> Result<ExtractionResult, MetaSiftError> {
        let system_prompt = self.prompts.transform_system(kind);
        let query = self.prompts.transform_query(
            &self.settings.topic,
            fragments,
            &self.settings.template,
            kind,
        );
        let external_prompt =
            hint.map(|h| self.prompts.repair_block(h.reference_answer, h.suggestion));

        let (temperature, samples) = match hint {
            Some(_) => (0.0, 1),
            None => (
                self.settings.extraction.extract_temperature,
                self.settings.extraction.extract_n,
            ),
        };

        let full_query = match &external_prompt {
            Some(block) => format!("{query}{block}"),
            None => query.clone(),
        };
        let request = OracleRequest::new("transform", system_prompt.as_str(), full_query)
            .temperature(temperature)
            .samples(samples);

        let responses = self.oracle.complete(&request).await?;
        let chosen = select_longest_fenced(&responses)
            .ok_or_else(|| MetaSiftError::Transform("oracle returned no completions".into()))?;

        let (integrated_table, explanation) = split_table_explanation(chosen);
        if integrated_table.trim().is_empty() {
            return Err(MetaSiftError::Transform(format!(
                "no table-like span in {kind} response"
            )));
        }

        info!(
            %kind,
            completions = responses.len(),
            repair = external_prompt.is_some(),
            table_chars = integrated_table.chars().count(),
            "Transform complete"
        );

        Ok(ExtractionResult {
            system_prompt,
            query,
            external_prompt,
            integrated_table,
            explanation,
        })
    }
}
