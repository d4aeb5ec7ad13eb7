//! CTIX CLI - Command-line interface
//!
//! Usage:
//!   ctix merge [--results DIR] [--relationships DIR] [--output DIR] [--concurrency N]
//!   ctix consolidate [--output DIR]
//!   ctix inspect <merged.json>

mod commands;
mod loader;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ctix_core::{AppConfig, LoggingConfig};

#[derive(Parser)]
#[command(name = "ctix")]
#[command(about = "CTI entity/relation reconciliation CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge entity and relation extraction results for every document
    Merge {
        /// Directory holding merged/, ioc/, kb/, novel/ and attack_ttp/ results
        #[arg(long)]
        results: Option<PathBuf>,
        /// Directory holding <document>_results.json relation files
        #[arg(long)]
        relationships: Option<PathBuf>,
        /// Output directory
        #[arg(long)]
        output: Option<PathBuf>,
        /// Documents processed concurrently
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Rebuild the consolidated file from existing merged outputs
    Consolidate {
        /// Output directory of a previous merge
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print a merged document's summary
    Inspect {
        /// Path to a <document>_merged.json file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };

    init_tracing(&config.logging);

    match cli.command {
        Commands::Merge {
            results,
            relationships,
            output,
            concurrency,
        } => {
            if let Some(dir) = results {
                config.batch.results_dir = dir;
            }
            if let Some(dir) = relationships {
                config.batch.relationship_dir = dir;
            }
            if let Some(dir) = output {
                config.batch.output_dir = dir;
            }
            if let Some(n) = concurrency {
                config.batch.concurrency = n;
            }
            config.validate().context("invalid configuration")?;

            let summary = commands::run_merge(&config).await?;
            println!(
                "Processed {} documents: {} succeeded, {} failed",
                summary.total_documents, summary.processed_successfully, summary.failed
            );
            println!("Output folder: {}", config.batch.output_dir.display());
        }
        Commands::Consolidate { output } => {
            let output = output.unwrap_or_else(|| config.batch.output_dir.clone());
            let consolidated =
                commands::run_consolidate(&output, config.batch.pretty_output).await?;
            println!("Consolidated {} documents", consolidated.len());
            println!("{}", consolidated.aggregate_counts.report());
        }
        Commands::Inspect { path } => {
            let report = commands::run_inspect(&path).await?;
            println!("{report}");
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ctix={0},ctix_core={0},ctix_reconcile={0}",
            logging.level
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}
