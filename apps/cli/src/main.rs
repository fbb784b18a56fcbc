//! NetGuard CLI - operator commands for the network traffic classifier
//!
//! This CLI provides a `netguard` command for training, promoting and
//! serving the safe / not-safe model from the local artifact store.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{RunsCommand, predict, promote, runs, train};

/// NetGuard - network traffic safety classifier
#[derive(Parser, Debug)]
#[command(name = "netguard", author, version, about = "NetGuard - train and serve a network traffic classifier")]
struct Args {
    /// Pipeline configuration file (defaults to ./netguard.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the artifact root from the configuration
    #[arg(long, global = true)]
    artifacts: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full training pass against the configured record source
    Train {
        /// Keep the bundle out of the final slot even if it passes
        #[arg(long)]
        no_promote: bool,

        /// Output the run record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Label the rows of a CSV file with the promoted model
    Predict {
        /// Input CSV with a header row
        input: PathBuf,

        /// Write the labelled table here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output the prediction summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect recorded training runs
    #[command(subcommand)]
    Runs(RunsCommand),

    /// Make a stored run's bundle the serving bundle
    Promote {
        /// Run ID to promote
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netguard=info,netguard_pipeline=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    let args = Args::parse();
    let config = config::load(args.config.as_deref(), args.artifacts)?;

    match args.command {
        Command::Train { no_promote, json } => train::execute(config, no_promote, json).await,
        Command::Predict { input, output, json } => predict::execute(config, &input, output.as_deref(), json),
        Command::Runs(command) => runs::execute(config, command),
        Command::Promote { run_id } => promote::execute(config, &run_id),
    }
}
