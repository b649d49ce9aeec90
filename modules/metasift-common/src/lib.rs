pub mod config;
pub mod error;
pub mod file_config;
pub mod types;

pub use config::AppConfig;
pub use error::MetaSiftError;
pub use file_config::{
    load_config, ExtractionConfig, FileConfig, MergeConfig, ModelsConfig, OracleConfig, RunConfig,
};
pub use types::*;
