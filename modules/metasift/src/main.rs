use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use ai_client::OpenAi;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use metasift::corpus::{convert_layout, load_corpus, save_corpus};
use metasift::run_log::RunLog;
use metasift::stats::RunStats;
use metasift::{OpenAiOracle, Oracle, Pipeline, PipelineSettings};
use metasift_common::{load_config, AppConfig, FileConfig, OracleConfig};

#[derive(Parser)]
#[command(name = "metasift")]
#[command(about = "Extract and merge meta-analysis tables from a paper corpus")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true, default_value = "metasift.toml")]
    config: PathBuf,

    /// Data directory, overriding DATA_DIR and the config file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Build corpus.json from converted_paper.json
    Corpus,
    /// Extract one record per paper from corpus.json
    Extract,
    /// Merge records into the normalized meta-analysis CSV
    Merge,
    /// Extract, then merge
    Run,
}

impl Command {
    fn name(self) -> &'static str {
        match self {
            Command::Corpus => "corpus",
            Command::Extract => "extract",
            Command::Merge => "merge",
            Command::Run => "run",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let file_config = load_config(&cli.config)?;
    let data_dir = cli
        .data_dir
        .clone()
        .or_else(AppConfig::data_dir_override)
        .unwrap_or_else(|| file_config.run.data_dir.clone());

    init_tracing(&data_dir.join("log"))?;
    info!(
        command = cli.command.name(),
        data_dir = %data_dir.display(),
        "MetaSift starting..."
    );

    match cli.command {
        Command::Corpus => build_corpus(&data_dir),
        command => run_pipeline(command, &file_config, data_dir).await,
    }
}

/// Human-readable logs on stderr, JSON lines in `<data_dir>/log/metasift.log`.
fn init_tracing(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("metasift.log"))?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("metasift=info".parse()?)
                .add_directive("ai_client=info".parse()?),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().json().with_writer(Mutex::new(file)))
        .init();
    Ok(())
}

fn build_corpus(data_dir: &Path) -> Result<()> {
    let corpus = convert_layout(data_dir)?;
    let path = save_corpus(data_dir, &corpus)?;
    info!(papers = corpus.len(), path = %path.display(), "Corpus written");
    Ok(())
}

fn oracle(ai: &OpenAi, model: &str, config: &OracleConfig) -> Arc<dyn Oracle> {
    let oracle = OpenAiOracle::new(ai.with_model(model), config);
    info!(model = oracle.model(), "Oracle configured");
    Arc::new(oracle)
}

async fn run_pipeline(command: Command, file_config: &FileConfig, data_dir: PathBuf) -> Result<()> {
    let app = AppConfig::from_env()?;
    let mut ai = OpenAi::new(app.openai_api_key.as_str(), file_config.models.extraction.as_str());
    if let Some(url) = &app.openai_base_url {
        ai = ai.with_base_url(url.as_str());
    }
    let settings = PipelineSettings::from_config(file_config, Some(data_dir))?;
    let runs_dir = settings.runs_dir();

    let pipeline = Pipeline::new(
        oracle(&ai, &file_config.models.extraction, &file_config.oracle),
        oracle(&ai, &file_config.models.normalization, &file_config.oracle),
        settings,
    )?;

    let started = Instant::now();
    let mut log = RunLog::new(command.name());
    let result = match command {
        Command::Extract => match load_corpus(&pipeline.settings().data_dir) {
            Ok(corpus) => pipeline.run_extraction(&corpus, &mut log).await,
            Err(e) => Err(e),
        },
        Command::Merge => pipeline.run_merge(&mut log).await,
        Command::Run | Command::Corpus => match load_corpus(&pipeline.settings().data_dir) {
            Ok(corpus) => pipeline.run(&corpus, &mut log).await,
            Err(e) => Err(e),
        },
    };

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            log.save(&runs_dir, &RunStats::default())?;
            return Err(e.into());
        }
    };
    log.save(&runs_dir, &stats)?;

    info!(elapsed_secs = started.elapsed().as_secs(), "MetaSift finished");
    println!("{stats}");
    Ok(())
}
