use std::path::PathBuf;

use anyhow::Result;

/// Application configuration loaded from environment variables.
/// Contains only secrets and env-specific values; field, topic, models and
/// pipeline knobs live in the TOML FileConfig.
#[derive(Clone)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    /// Overrides `[run] data_dir` when set.
    pub data_dir: Option<PathBuf>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("openai_api_key", &preview(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable is required"))?;

        let config = Self {
            openai_api_key,
            openai_base_url: non_empty_var("OPENAI_BASE_URL"),
            data_dir: Self::data_dir_override(),
        };

        config.log_keys();
        Ok(config)
    }

    /// `DATA_DIR` from the environment, if set and non-empty.
    pub fn data_dir_override() -> Option<PathBuf> {
        non_empty_var("DATA_DIR").map(PathBuf::from)
    }

    fn log_keys(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  OPENAI_API_KEY: {}", preview(&self.openai_api_key));
        tracing::info!(
            "  OPENAI_BASE_URL: {}",
            self.openai_base_url.as_deref().unwrap_or("<not set>")
        );
        tracing::info!(
            "  DATA_DIR: {}",
            self.data_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<not set>".to_string())
        );
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn preview(val: &str) -> String {
    let n = val
        .char_indices()
        .nth(5)
        .map(|(i, _)| i)
        .unwrap_or(val.len());
    format!("{}...({} chars)", &val[..n], val.chars().count())
}
