use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetaSiftError {
    /// The oracle answered, but not in the shape the call site asked for.
    #[error("Oracle shape error [{stage}]: {detail}")]
    OracleShape { stage: &'static str, detail: String },

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Check error: {0}")]
    Check(String),

    #[error("Merge batch {batch} failed: {reason}")]
    MergeBatch { batch: usize, reason: String },

    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl MetaSiftError {
    pub fn shape(stage: &'static str, detail: impl Into<String>) -> Self {
        MetaSiftError::OracleShape {
            stage,
            detail: detail.into(),
        }
    }
}
