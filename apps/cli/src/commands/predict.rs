//! Batch prediction over a CSV file.

use anyhow::{Context, Result};
use colored::Colorize;
use netguard_pipeline::{
    ArtifactLayout, ArtifactStore, PipelineConfig, PipelineError, PredictionOutcome, PredictionService, Table,
};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub fn execute(config: PipelineConfig, input: &Path, output: Option<&Path>, json_output: bool) -> Result<()> {
    let file = File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let table = Table::from_csv_reader(BufReader::new(file))
        .with_context(|| format!("Failed to read CSV from {}", input.display()))?;
    debug!(input = %input.display(), rows = table.len(), "read prediction input");

    let store = Arc::new(ArtifactStore::new(ArtifactLayout::new(config.artifacts.root)));
    let service = PredictionService::new(store)?;
    let predictions = service.predict(&table).map_err(|e| match e {
        PipelineError::ModelNotReady => {
            anyhow::Error::new(e).context("No model has been promoted yet. Run `netguard train` first.")
        }
        other => anyhow::Error::new(other).context("Prediction failed"),
    })?;
    let outcome = PredictionOutcome::new(table, predictions)?;

    match output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
            outcome.table.write_csv(BufWriter::new(file))?;
        }
        None if !json_output => outcome.table.write_csv(std::io::stdout().lock())?,
        None => {}
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
    } else {
        eprintln!(
            "{} {} rows: {} safe, {} not safe",
            "Predicted".bold().green(),
            outcome.summary.total,
            outcome.summary.safe.to_string().green(),
            outcome.summary.not_safe.to_string().red()
        );
    }
    Ok(())
}
