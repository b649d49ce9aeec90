use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::MetaSiftError;

/// TOML-backed configuration loaded from disk.
/// Secrets (API keys, endpoint) stay as env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub run: RunConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Holds `corpus.json`, `results/`, `runs/`, `log/` and the final CSV.
    pub data_dir: PathBuf,
    /// Research field the prompts are written for, e.g. "environmental science".
    pub field: String,
    /// Topic of interest used by the relevance filter and the transform.
    pub topic: String,
    /// Markdown column template (header row plus example rows).
    pub template: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ModelsConfig {
    pub extraction: String,
    pub normalization: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            extraction: "gpt-4.1".to_string(),
            normalization: "gpt-4.1-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExtractionConfig {
    pub first_level_threshold: f64,
    pub extract_n: u32,
    pub extract_temperature: f32,
    pub check_threshold: u8,
    pub max_check_num: u32,
    pub max_workers: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            first_level_threshold: 0.5,
            extract_n: 5,
            extract_temperature: 0.9,
            check_threshold: 6,
            max_check_num: 2,
            max_workers: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MergeConfig {
    pub batch_size: usize,
    pub max_try: u32,
    pub max_workers: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_try: 3,
            max_workers: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OracleConfig {
    pub time_limit_secs: u64,
    /// Total attempts per call. Timeouts, network errors, 429 and 5xx are
    /// retried; anything else fails on the first attempt.
    pub max_try: u32,
    pub max_tokens: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            time_limit_secs: 300,
            max_try: 3,
            max_tokens: 4096,
        }
    }
}

impl FileConfig {
    /// Reject knob values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), MetaSiftError> {
        let ex = &self.extraction;
        if !(0.0..=1.0).contains(&ex.first_level_threshold) {
            return Err(MetaSiftError::Config(format!(
                "extraction.first_level_threshold must lie in [0, 1], got {}",
                ex.first_level_threshold
            )));
        }
        if ex.extract_n == 0 {
            return Err(MetaSiftError::Config("extraction.extract_n must be >= 1".into()));
        }
        if !(1..=10).contains(&ex.check_threshold) {
            return Err(MetaSiftError::Config(format!(
                "extraction.check_threshold must lie in 1..=10, got {}",
                ex.check_threshold
            )));
        }
        if ex.max_workers == 0 || self.merge.max_workers == 0 {
            return Err(MetaSiftError::Config("max_workers must be >= 1".into()));
        }
        if self.merge.batch_size == 0 {
            return Err(MetaSiftError::Config("merge.batch_size must be >= 1".into()));
        }
        if self.merge.max_try == 0 || self.oracle.max_try == 0 {
            return Err(MetaSiftError::Config("max_try must be >= 1".into()));
        }
        if self.oracle.time_limit_secs == 0 {
            return Err(MetaSiftError::Config("oracle.time_limit_secs must be >= 1".into()));
        }
        if self.run.topic.trim().is_empty() || self.run.field.trim().is_empty() {
            return Err(MetaSiftError::Config("run.field and run.topic must be set".into()));
        }
        Ok(())
    }
}

/// Load, resolve and validate a TOML config file.
///
/// Relative `data_dir` and `template` paths are resolved against the
/// directory containing the config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.run.data_dir = resolve(base, &config.run.data_dir);
    config.run.template = resolve(base, &config.run.template);

    config.validate()?;
    Ok(config)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
