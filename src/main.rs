pub mod batch;
pub mod config;
pub mod data;
pub mod error;
pub mod output;
pub mod prefectures;
pub mod processing;
pub mod quantize;
pub mod types;


use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::batch::{BatchSettings, BatchSummary};
use crate::config::AppConfig;
use crate::data::TemplateSource;
use crate::output::OutputDir;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Only process these prefecture codes, e.g. `--regions 13,14`
    #[arg(long, value_delimiter = ',', global = true)]
    regions: Option<Vec<u8>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge municipality boundaries into one file per prefecture
    Municipalities,
    /// Split oaza boundaries into one file per municipality, plus a count index
    Oaza,
    /// Run both pipelines
    All,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut app_config = AppConfig::load_from_file(&cli.config)?;
    if let Some(regions) = cli.regions {
        app_config.processing.regions = config::sorted_regions(regions)?;
    }

    let quantizer = app_config.quantizer();
    info!(
        config = %cli.config.display(),
        regions = app_config.processing.regions.len(),
        decimals = quantizer.decimals(),
        rounding = ?quantizer.rounding(),
        "Configuration loaded"
    );

    let summaries = match cli.command {
        Commands::Municipalities => vec![municipalities(&app_config)?],
        Commands::Oaza => vec![oaza(&app_config)?],
        // Both run even if the first one had failing regions.
        Commands::All => vec![municipalities(&app_config)?, oaza(&app_config)?],
    };

    Ok(ExitCode::from(batch::exit_status(&summaries)))
}

fn municipalities(config: &AppConfig) -> Result<BatchSummary> {
    let section = &config.municipalities;
    let source = TemplateSource::new(&section.source, &config.http.user_agent, section.timeout())
        .context("Failed to set up the municipality source")?;
    let settings = BatchSettings {
        regions: config.processing.regions.clone(),
        quantizer: config.quantizer(),
        retry: section.retry(),
        output: OutputDir::create(section.output_dir.clone())?,
    };
    info!(source = %section.source, output = %settings.output.path().display(), "Preparing municipalities");

    let summary = batch::run_municipalities(&source, &section.keys(), &settings);
    summary.log("municipalities");
    Ok(summary)
}

fn oaza(config: &AppConfig) -> Result<BatchSummary> {
    let section = &config.oaza;
    let source = TemplateSource::new(&section.source, &config.http.user_agent, section.timeout())
        .context("Failed to set up the oaza source")?;
    let settings = BatchSettings {
        regions: config.processing.regions.clone(),
        quantizer: config.quantizer(),
        retry: section.retry(),
        output: OutputDir::create(section.output_dir.clone())?,
    };
    info!(source = %section.source, output = %settings.output.path().display(), "Preparing oaza");

    let summary = batch::run_oaza(&source, &section.keys(), &section.meta_file, &settings)
        .context("Failed to write the oaza index")?;
    summary.log("oaza");
    Ok(summary)
}
