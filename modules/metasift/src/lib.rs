pub mod checker;
pub mod corpus;
pub mod extractor;
pub mod markdown;
pub mod merger;
pub mod normalize;
pub mod oracle;
pub mod pipeline;
pub mod prompts;
pub mod repair;
pub mod results;
pub mod run_log;
pub mod settings;
pub mod shape;
pub mod stats;
pub mod template;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use oracle::{OpenAiOracle, Oracle, OracleRequest};
pub use pipeline::{PaperExtraction, Pipeline};
pub use settings::PipelineSettings;
