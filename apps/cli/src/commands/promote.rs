//! Manual promotion of a stored bundle.

use anyhow::{Context, Result};
use colored::Colorize;
use netguard_pipeline::{ArtifactLayout, ArtifactStore, PipelineConfig, RunId};
use tracing::info;

pub fn execute(config: PipelineConfig, run_id: &str) -> Result<()> {
    let run_id = RunId::parse(run_id)?;
    let store = ArtifactStore::new(ArtifactLayout::new(config.artifacts.root));
    let generation = store.promote(&run_id).with_context(|| format!("Failed to promote run {run_id}"))?;
    info!(run_id = %run_id, generation, "promoted bundle");

    println!(
        "{} {} {}",
        "Promoted".bold().green(),
        run_id.to_string().cyan(),
        format!("(generation {generation})").dimmed()
    );
    Ok(())
}
