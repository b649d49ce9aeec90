use std::path::PathBuf;

use metasift_common::{ExtractionConfig, FileConfig, MergeConfig, MetaSiftError};

use crate::markdown::trim_template;

/// Everything one run needs to know about its research question, carried
/// explicitly through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub field: String,
    pub topic: String,
    /// Column template with one leading and one trailing newline removed.
    pub template: String,
    pub data_dir: PathBuf,
    pub extraction: ExtractionConfig,
    pub merge: MergeConfig,
}

impl PipelineSettings {
    /// Build settings from a loaded config, reading the template file.
    /// `data_dir` overrides `[run] data_dir` when given.
    pub fn from_config(
        config: &FileConfig,
        data_dir: Option<PathBuf>,
    ) -> Result<Self, MetaSiftError> {
        let template_path = &config.run.template;
        let template = std::fs::read_to_string(template_path).map_err(|e| {
            MetaSiftError::MissingArtifact(format!(
                "column template {}: {e}",
                template_path.display()
            ))
        })?;

        Ok(Self::new(
            &config.run.field,
            &config.run.topic,
            &template,
            data_dir.unwrap_or_else(|| config.run.data_dir.clone()),
        )
        .with_extraction(config.extraction.clone())
        .with_merge(config.merge.clone()))
    }

    pub fn new(field: &str, topic: &str, template: &str, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            field: field.to_string(),
            topic: topic.to_string(),
            template: trim_template(template).to_string(),
            data_dir: data_dir.into(),
            extraction: ExtractionConfig::default(),
            merge: MergeConfig::default(),
        }
    }

    pub fn with_extraction(mut self, extraction: ExtractionConfig) -> Self {
        self.extraction = extraction;
        self
    }

    pub fn with_merge(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }

    pub fn output_path(&self) -> PathBuf {
        self.data_dir.join("meta_analysis.csv")
    }
}
