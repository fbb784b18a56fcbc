//! Run history commands.

use super::RunsCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use netguard_pipeline::{ArtifactLayout, PipelineConfig, RunHistory, RunId, RunStatus};

pub fn execute(config: PipelineConfig, command: RunsCommand) -> Result<()> {
    let history = RunHistory::new(ArtifactLayout::new(config.artifacts.root));
    match command {
        RunsCommand::List { json } => list(&history, json),
        RunsCommand::Show { run_id } => {
            let run_id = RunId::parse(&run_id)?;
            let record = history.get(&run_id).with_context(|| format!("Run {run_id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
    }
}

fn list(history: &RunHistory, json_output: bool) -> Result<()> {
    let records = history.list().context("Failed to read run history")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Training Runs ({})", records.len()).bold().cyan());
    println!();

    if records.is_empty() {
        println!("  {}", "No training runs recorded yet.".dimmed());
        println!();
        return Ok(());
    }

    println!("{:<32} {:<16} {:<14} {:>6}  {}", "Run", "Status", "Algorithm", "F1", "Promoted");
    println!("{}", "─".repeat(80));
    for record in records {
        let status = match record.status {
            RunStatus::Succeeded => record.status.as_str().green(),
            RunStatus::BelowThreshold => record.status.as_str().yellow(),
            RunStatus::Failed => record.status.as_str().red(),
        };
        let f1 = record.eval_metrics.map_or_else(|| "-".to_string(), |m| format!("{:.3}", m.f1));
        println!(
            "{:<32} {:<16} {:<14} {:>6}  {}",
            record.run_id.to_string().cyan(),
            status,
            record.algorithm.as_deref().unwrap_or("-"),
            f1,
            if record.promoted { "yes" } else { "" }
        );
    }
    println!();
    Ok(())
}
