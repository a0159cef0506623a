use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moodlens_core::{Analyzer, Config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "moodlens", about = "Facial emotion and wellbeing analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a single image and print the result as JSON
    Analyze {
        /// Image file (JPEG, PNG, ...)
        path: PathBuf,
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Print the liveness status
    Health,
    /// Download and load every model into the cache
    FetchModels,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { path, pretty } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let analyzer = Analyzer::new(&Config::from_env())?;
            let result = analyzer.analyze(&bytes)?;
            let json = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{json}");
        }
        Commands::Health => {
            println!("{}", serde_json::to_string(&moodlens_core::health())?);
        }
        Commands::FetchModels => {
            let config = Config::from_env();
            let analyzer = Analyzer::new(&config)?;
            let loaded = analyzer
                .warm_up()
                .context("failed to prepare models")?;
            tracing::info!(?loaded, "models ready");
            for path in [
                config.detector_model_path(),
                config.cascade_model_path(),
                config.classifier_model_path(),
            ] {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}
