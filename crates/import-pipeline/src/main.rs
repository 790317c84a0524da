//! Import Pipeline - chunked sample import tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use import_common::logging::{init_logging, LogConfig, LogLevel};
use import_pipeline::{ImportCoordinator, ImportOutcome, PipelineConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "import-pipeline")]
#[command(author, version, about = "Chunked sample import pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to $IMPORT_CONFIG or ./import.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full import cycle for a configured import
    Run {
        /// Name of the import (a key of the [imports] table)
        import: String,

        /// Write the JSON outcome to this file
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Import from an already staged object instead of copying the source
        #[arg(long, value_name = "KEY")]
        staged: Option<String>,
    },

    /// Stat the source and check its lock without importing
    Check {
        /// Name of the import
        import: String,
    },

    /// Print the resolved configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("import-pipeline")
        .build()
        .merge_env()
        .context("Invalid logging environment")?;

    let _guard = init_logging(&log_config)?;

    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            import,
            report,
            staged,
        } => {
            let mut settings = config.settings_for(&import)?;
            settings.resume_staged_key = staged;

            let coordinator = ImportCoordinator::from_config(&config)?;
            let outcome = coordinator
                .run(&settings)
                .await
                .with_context(|| format!("Import '{}' failed", import))?;

            match &outcome {
                ImportOutcome::NoNewData { lock_key, .. } => {
                    info!(lock_key = %lock_key, "No new data, nothing imported");
                },
                ImportOutcome::Imported { import_id, report, .. } => {
                    info!(
                        import_id = %import_id,
                        imported = report.imported,
                        invalid = report.invalid,
                        "Import finished"
                    );
                },
            }

            if let Some(path) = report {
                let json = serde_json::to_string_pretty(&outcome)?;
                tokio::fs::write(&path, json)
                    .await
                    .with_context(|| format!("Failed to write report to {}", path.display()))?;
                info!("Report written to {}", path.display());
            }
        },
        Command::Check { import } => {
            let settings = config.settings_for(&import)?;
            let coordinator = ImportCoordinator::from_config(&config)?;
            let probe = coordinator.probe(&settings).await?;
            println!("{}", serde_json::to_string_pretty(&probe)?);
        },
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        },
    }

    Ok(())
}
